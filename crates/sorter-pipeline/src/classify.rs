// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Grading boundary
//!
//! The grader is external code: panics are contained here and surface as
//! `GradingError::AlgorithmFault`. A failed grading yields no record at all,
//! never a placeholder grade.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use sorter_hal::{Frame, GradeRecord, Grader, GradingError};
use tracing::warn;

use crate::trigger::TriggerEvent;

pub struct ClassificationAdapter {
    grader: Arc<dyn Grader>,
}

impl ClassificationAdapter {
    pub fn new(grader: Arc<dyn Grader>) -> Self {
        Self { grader }
    }

    pub fn classify(
        &self,
        frame: &Frame,
        trigger: &TriggerEvent,
    ) -> Result<GradeRecord, GradingError> {
        let grader = Arc::clone(&self.grader);
        let graded = catch_unwind(AssertUnwindSafe(|| grader.grade(&frame.data)))
            .unwrap_or_else(|payload| Err(GradingError::AlgorithmFault(panic_message(payload))));

        let record = match graded {
            Ok(record) => normalize(record, trigger)?,
            Err(error) => {
                warn!("[GRADING] #{} failed: {}", trigger.sequence_id, error);
                return Err(error);
            }
        };
        Ok(record)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("grader panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("grader panicked: {}", message)
    } else {
        "grader panicked".to_string()
    }
}

fn normalize(mut record: GradeRecord, trigger: &TriggerEvent) -> Result<GradeRecord, GradingError> {
    for (name, value) in [("length", record.length_mm), ("diameter", record.diameter_mm)] {
        if !value.is_finite() || value < 0.0 {
            warn!(
                "[GRADING] #{} rejected: {} = {}",
                trigger.sequence_id, name, value
            );
            return Err(GradingError::InvalidMeasurement(format!(
                "{} must be a finite, non-negative value, got {}",
                name, value
            )));
        }
    }

    if record.item_id.trim().is_empty() {
        record.item_id = format!("item_{:06}", trigger.sequence_id);
    }
    record.confidence = if record.confidence.is_finite() {
        record.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    record.defects = record
        .defects
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sorter_hal::{FnGrader, Grade};

    fn frame() -> Frame {
        Frame {
            data: vec![1, 2, 3, 4],
            width: 2,
            height: 2,
            captured_at: Utc::now(),
        }
    }

    fn trigger(sequence_id: u64) -> TriggerEvent {
        TriggerEvent {
            trigger_position: 150,
            sequence_id,
            timestamp_ms: 0,
            created_at: Utc::now(),
        }
    }

    fn adapter<F>(f: F) -> ClassificationAdapter
    where
        F: Fn(&[u8]) -> Result<GradeRecord, GradingError> + Send + Sync + 'static,
    {
        ClassificationAdapter::new(Arc::new(FnGrader(f)))
    }

    #[test]
    fn success_is_normalized() {
        let adapter = adapter(|_| {
            let mut record =
                GradeRecord::new(Grade::A, 190.0, 14.0).with_defects([" scar ", "", "bend"]);
            record.confidence = 1.7;
            Ok(record)
        });

        let record = adapter.classify(&frame(), &trigger(42)).unwrap();
        assert_eq!(record.item_id, "item_000042");
        assert_eq!(record.grade, Grade::A);
        assert_eq!(record.confidence, 1.0);
        assert_eq!(record.defects, vec!["scar".to_string(), "bend".to_string()]);
    }

    #[test]
    fn grader_item_id_is_kept() {
        let adapter = adapter(|_| {
            let mut record = GradeRecord::new(Grade::B, 150.0, 12.0);
            record.item_id = "cam1-0007".to_string();
            Ok(record)
        });
        let record = adapter.classify(&frame(), &trigger(7)).unwrap();
        assert_eq!(record.item_id, "cam1-0007");
    }

    #[test]
    fn grading_error_is_passed_through() {
        let adapter = adapter(|_| Err(GradingError::MalformedImage("truncated JPEG".into())));
        assert_eq!(
            adapter.classify(&frame(), &trigger(1)),
            Err(GradingError::MalformedImage("truncated JPEG".into()))
        );
    }

    #[test]
    fn panic_becomes_algorithm_fault() {
        let adapter = adapter(|_| panic!("division by zero in contour fit"));
        match adapter.classify(&frame(), &trigger(1)) {
            Err(GradingError::AlgorithmFault(message)) => {
                assert!(message.contains("contour fit"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_finite_measurement_is_rejected() {
        let adapter = adapter(|_| Ok(GradeRecord::new(Grade::C, f64::NAN, 10.0)));
        assert!(matches!(
            adapter.classify(&frame(), &trigger(1)),
            Err(GradingError::InvalidMeasurement(_))
        ));
    }
}
