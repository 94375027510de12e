use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detect::Detection;

/// Human-readable alert text. Depends only on the detections and the time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
    pub detection_summary: String,
}

pub fn compose(detections: &[Detection], at: SystemTime) -> AlertMessage {
    let count = detections.len();
    let unix_secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut body = format!(
        "Smart Surveillance Alert\nTime: {}\nObjects Detected: {}\n\n",
        unix_secs, count
    );
    for det in detections {
        let _ = writeln!(
            body,
            "- {} (Confidence: {:.2}%)",
            det.class_name,
            det.confidence * 100.0
        );
    }

    AlertMessage {
        subject: format!("Security Alert: {} Object(s) Detected", count),
        body,
        detection_summary: summarize(detections),
    }
}

/// `"person (0.91), car (0.80)"`
pub fn summarize(detections: &[Detection]) -> String {
    detections
        .iter()
        .map(|det| format!("{} ({:.2})", det.class_name, det.confidence))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use std::time::Duration;

    #[test]
    fn composes_subject_body_and_summary() {
        let detections = vec![
            Detection::new("person", 0.9, BoundingBox::new(0, 0, 1, 1), 0),
            Detection::new("car", 0.8, BoundingBox::new(0, 0, 1, 1), 2),
        ];
        let message = compose(&detections, UNIX_EPOCH + Duration::from_secs(1_700_000_000));

        assert_eq!(message.subject, "Security Alert: 2 Object(s) Detected");
        assert_eq!(
            message.body,
            "Smart Surveillance Alert\nTime: 1700000000\nObjects Detected: 2\n\n\
             - person (Confidence: 90.00%)\n- car (Confidence: 80.00%)\n"
        );
        assert_eq!(message.detection_summary, "person (0.90), car (0.80)");
    }
}
