use crate::roi::Roi;

use serde::{Serialize, Serializer, ser::SerializeMap};

/// Box coordinates as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnhancedBox {
    #[serde(rename = "x-max")]
    pub x_max: usize,
    #[serde(rename = "y-max")]
    pub y_max: usize,
    #[serde(rename = "x-min")]
    pub x_min: usize,
    #[serde(rename = "y-min")]
    pub y_min: usize,
}

impl From<Roi> for EnhancedBox {
    fn from(roi: Roi) -> Self {
        Self {
            x_max: roi.xmax,
            y_max: roi.ymax,
            x_min: roi.xmin,
            y_min: roi.ymin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SliceEntry {
    #[serde(rename = "Enhanced Box")]
    pub enhanced_box: EnhancedBox,
}

/// Per-slice ROI record of one patient.
///
/// Keys are `"<patient>_Slice_<NN>"` and keep slice order when serialized,
/// also past slice 99 where lexical order would not.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataRecord {
    entries: Vec<(String, SliceEntry)>,
}

impl MetadataRecord {
    pub fn from_rois(patient: &str, rois: &[Roi]) -> Self {
        let entries = rois
            .iter()
            .enumerate()
            .map(|(index, &roi)| {
                (
                    slice_key(patient, index),
                    SliceEntry {
                        enhanced_box: roi.into(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&SliceEntry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, entry)| entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SliceEntry)> {
        self.entries.iter().map(|(k, entry)| (k.as_str(), entry))
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for MetadataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, entry) in &self.entries {
            map.serialize_entry(key, entry)?;
        }
        map.end()
    }
}

pub fn slice_key(patient: &str, index: usize) -> String {
    format!("{patient}_Slice_{index:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_zero_padded() {
        assert_eq!(slice_key("P7", 3), "P7_Slice_03");
        assert_eq!(slice_key("P7", 42), "P7_Slice_42");
        assert_eq!(slice_key("P7", 120), "P7_Slice_120");
    }

    #[test]
    fn serializes_in_slice_order_with_box_fields() {
        let rois = vec![Roi::new(1, 10, 2, 20), Roi::full_frame(256, 256)];
        let record = MetadataRecord::from_rois("pat", &rois);
        assert_eq!(record.len(), 2);

        let text = record.to_json_pretty().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let first = &json["pat_Slice_00"]["Enhanced Box"];
        assert_eq!(first["x-min"], 1);
        assert_eq!(first["x-max"], 10);
        assert_eq!(first["y-min"], 2);
        assert_eq!(first["y-max"], 20);
        assert_eq!(json["pat_Slice_01"]["Enhanced Box"]["y-max"], 256);
    }

    #[test]
    fn preserves_order_beyond_two_digits() {
        let rois = vec![Roi::full_frame(4, 4); 101];
        let record = MetadataRecord::from_rois("p", &rois);
        let keys: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys[99], "p_Slice_99");
        assert_eq!(keys[100], "p_Slice_100");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.find("p_Slice_99").unwrap() < json.find("p_Slice_100").unwrap());
    }
}
