use common::{LogBuffer, StatusRecord};
use proptest::prelude::*;

proptest! {
    /// The buffer never grows past its capacity and always keeps the most
    /// recent lines in arrival order.
    #[test]
    fn log_buffer_keeps_latest_lines(
        lines in prop::collection::vec("[a-z0-9 ]{0,12}", 0..64),
    ) {
        let mut logs = LogBuffer::default();
        for line in &lines {
            logs.push(line.clone());
            prop_assert!(logs.len() <= LogBuffer::DEFAULT_CAPACITY);
        }

        let expected: Vec<String> = lines
            .iter()
            .skip(lines.len().saturating_sub(LogBuffer::DEFAULT_CAPACITY))
            .cloned()
            .collect();
        prop_assert_eq!(logs.to_vec(), expected);
    }

    /// Records built from the buffer survive a JSON round trip with the
    /// bound intact.
    #[test]
    fn published_logs_stay_bounded(count in 0usize..40) {
        let mut logs = LogBuffer::default();
        for i in 0..count {
            logs.push(format!("2024-01-01 event {i}"));
        }
        let mut record = StatusRecord::initial("prop", 10_000.0);
        record.recent_logs = logs.to_vec();

        let json = serde_json::to_string(&record).unwrap();
        let back: StatusRecord = serde_json::from_str(&json).unwrap();
        prop_assert!(back.recent_logs.len() <= 10);
        prop_assert_eq!(back.recent_logs.len(), count.min(10));
    }
}
