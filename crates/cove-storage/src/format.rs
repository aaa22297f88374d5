use crate::StorageError;
use cove_core::{Lane, Task, TaskId};
use serde::{Deserialize, Serialize};

pub const LANE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueRecord {
    pub element_id: TaskId,
    pub object: Task,
}

impl QueueRecord {
    pub fn new(task: Task) -> Self {
        Self {
            element_id: task.id(),
            object: task,
        }
    }
}

#[derive(Serialize)]
struct LaneFileRef<'a> {
    format_version: u32,
    lane: Lane,
    records: &'a [QueueRecord],
}

#[derive(Deserialize)]
struct LaneHeader {
    format_version: u32,
}

#[derive(Deserialize)]
struct LaneFile {
    lane: Lane,
    records: Vec<QueueRecord>,
}

pub(crate) fn encode(lane: Lane, records: &[QueueRecord]) -> Result<Vec<u8>, StorageError> {
    let file = LaneFileRef {
        format_version: LANE_FORMAT_VERSION,
        lane,
        records,
    };
    Ok(serde_json::to_vec_pretty(&file)?)
}

pub(crate) fn decode(lane: Lane, bytes: &[u8]) -> Result<Vec<QueueRecord>, StorageError> {
    let header: LaneHeader = serde_json::from_slice(bytes)?;
    if header.format_version != LANE_FORMAT_VERSION {
        return Err(StorageError::UnsupportedFormat {
            found: header.format_version,
            supported: LANE_FORMAT_VERSION,
        });
    }

    let file: LaneFile = serde_json::from_slice(bytes)?;
    if file.lane != lane {
        return Err(StorageError::Data(format!(
            "lane file belongs to the {} lane, expected {lane}",
            file.lane
        )));
    }

    Ok(file.records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cove_core::ActionKind;

    #[test]
    fn records_keep_their_order() {
        let records = vec![
            QueueRecord::new(Task::new("a", ActionKind::Read, "u")),
            QueueRecord::new(Task::new("b", ActionKind::Label, "u")),
        ];
        let bytes = encode(Lane::Secondary, &records).expect("encoded");
        let decoded = decode(Lane::Secondary, &bytes).expect("decoded");
        assert_eq!(decoded, records);
    }

    #[test]
    fn newer_format_is_refused() {
        let bytes = br#"{"format_version": 7, "lane": "primary", "records": []}"#;
        assert!(matches!(
            decode(Lane::Primary, bytes),
            Err(StorageError::UnsupportedFormat { found: 7, .. })
        ));
    }

    #[test]
    fn unversioned_format_is_refused() {
        let bytes = br#"{"format_version": 0, "lane": "primary", "records": []}"#;
        assert!(matches!(
            decode(Lane::Primary, bytes),
            Err(StorageError::UnsupportedFormat { found: 0, .. })
        ));
    }

    #[test]
    fn file_from_the_other_lane_is_refused() {
        let bytes = encode(Lane::Primary, &[]).expect("encoded");
        assert!(matches!(
            decode(Lane::Secondary, &bytes),
            Err(StorageError::Data(_))
        ));
    }
}
