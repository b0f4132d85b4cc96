//! Test helper that implements [`forge_oss::UploadProgressCallback`] which keeps a record of every
//! progress update in order so we can write tests that verify progress reporting.
use forge_oss::{UploadProgressCallback, UploadResult, UploadState};
use more_asserts::*;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, strum::EnumDiscriminants)]
#[allow(dead_code)] // Not all of these are used in tests but we want to capture all fields for all events
pub(crate) enum UploadProgressEvent {
    UploadStarted {
        total_bytes: u64,
        total_parts: u32,
    },

    StateChanged {
        state: UploadState,
    },

    BatchAcquired {
        batch_index: u32,
        first_part: u32,
        part_count: u32,
    },

    PartUploaded {
        part_number: u32,
        bytes: u64,
    },

    UploadCompleted {
        result: UploadResult,
    },
}

#[derive(Clone)]
pub(crate) struct TestUploadProgressCallback {
    events: Arc<Mutex<Vec<UploadProgressEvent>>>,
}

// Helper macro to reduce boilerplate when matching on specific events
macro_rules! with_match {
    ($var:ident, $matches:pat, $block:block) => {
        if let $matches = $var {
            $block
        } else {
            unreachable!(
                "{}",
                concat!(
                    stringify!($var),
                    " does not match expression ",
                    stringify!($matches)
                )
            )
        }
    };
}

impl TestUploadProgressCallback {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Review all updates after an upload has run to successful completion, validating that the
    /// updates are all sane and consistent with each other.
    ///
    /// If the upload didn't finish successfully then this check should not be applied.
    pub fn sanity_check_updates(&self) {
        let (total_bytes, total_parts) = self.upload_started();

        // Every part was reported exactly once, in order
        let parts = self.parts_uploaded();
        assert_eq!(
            parts.iter().map(|(part_number, _)| *part_number).collect::<Vec<_>>(),
            (1..=total_parts).collect::<Vec<_>>()
        );
        assert_eq!(
            parts.iter().map(|(_, bytes)| *bytes).sum::<u64>(),
            total_bytes
        );

        // Batches cover all parts with no gaps, and none is larger than the gateway allows
        let batches = self.batches_acquired();
        assert_gt!(batches.len(), 0);
        let mut next_part = 1;
        for (index, (batch_index, first_part, part_count)) in batches.iter().enumerate() {
            assert_eq!(*batch_index as usize, index);
            assert_eq!(*first_part, next_part);
            assert_le!(*part_count, forge_oss::MAX_PARTS_PER_REQUEST);
            next_part += part_count;
        }
        assert_eq!(next_part, total_parts + 1);

        // The state machine starts planning, alternates fetching and uploading once per batch,
        // and ends complete
        let mut expected_states = vec![UploadState::Planning];
        for _ in &batches {
            expected_states.push(UploadState::BatchInFlight);
            expected_states.push(UploadState::ChunkUploading);
        }
        expected_states.push(UploadState::Finalizing);
        expected_states.push(UploadState::Complete);
        assert_eq!(self.states(), expected_states);

        let result = self.upload_completed().unwrap();
        assert_eq!(result.size, total_bytes);
    }

    /// The total bytes and parts from the upload started event
    pub fn upload_started(&self) -> (u64, u32) {
        let event = self
            .filter_single_event(UploadProgressEventDiscriminants::UploadStarted)
            .unwrap();
        with_match!(
            event,
            UploadProgressEvent::UploadStarted {
                total_bytes,
                total_parts
            },
            { (total_bytes, total_parts) }
        )
    }

    /// Every state the upload moved through, in order
    pub fn states(&self) -> Vec<UploadState> {
        self.filter_events(UploadProgressEventDiscriminants::StateChanged)
            .into_iter()
            .map(|event| with_match!(event, UploadProgressEvent::StateChanged { state }, { state }))
            .collect()
    }

    /// The batch index, first part and part count of every batch acquired event
    pub fn batches_acquired(&self) -> Vec<(u32, u32, u32)> {
        self.filter_events(UploadProgressEventDiscriminants::BatchAcquired)
            .into_iter()
            .map(|event| {
                with_match!(
                    event,
                    UploadProgressEvent::BatchAcquired {
                        batch_index,
                        first_part,
                        part_count
                    },
                    { (batch_index, first_part, part_count) }
                )
            })
            .collect()
    }

    /// The part number and size of every part uploaded event
    pub fn parts_uploaded(&self) -> Vec<(u32, u64)> {
        self.filter_events(UploadProgressEventDiscriminants::PartUploaded)
            .into_iter()
            .map(|event| {
                with_match!(
                    event,
                    UploadProgressEvent::PartUploaded { part_number, bytes },
                    { (part_number, bytes) }
                )
            })
            .collect()
    }

    pub fn upload_completed(&self) -> Option<UploadResult> {
        self.filter_single_event(UploadProgressEventDiscriminants::UploadCompleted)
            .map(|event| {
                with_match!(event, UploadProgressEvent::UploadCompleted { result }, {
                    result
                })
            })
    }

    /// Iterate over all events of a certain type
    pub fn filter_events(&self, typ: UploadProgressEventDiscriminants) -> Vec<UploadProgressEvent> {
        let events = self.events.lock().unwrap();

        events
            .iter()
            .filter(|event| {
                let event_typ: UploadProgressEventDiscriminants = (*event).into();

                event_typ == typ
            })
            .cloned()
            .collect::<Vec<_>>()
    }

    /// Get the single ocurrence of an event, if it can only appear 0 or 1 times.  If it appears
    /// more than this an assert is fired
    pub fn filter_single_event(
        &self,
        typ: UploadProgressEventDiscriminants,
    ) -> Option<UploadProgressEvent> {
        let mut events = self.filter_events(typ);

        assert!(
            events.len() <= 1,
            "Expected 0 or 1 instances of {:?}, but found {}",
            typ,
            events.len()
        );

        events.pop()
    }

    fn report_event(&self, event: UploadProgressEvent) {
        let mut events = self.events.lock().unwrap();

        events.push(event)
    }
}

impl std::fmt::Debug for TestUploadProgressCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events = self.events.lock().unwrap();
        events.fmt(f)
    }
}

impl UploadProgressCallback for TestUploadProgressCallback {
    fn upload_started(&self, total_bytes: u64, total_parts: u32) {
        self.report_event(UploadProgressEvent::UploadStarted {
            total_bytes,
            total_parts,
        });
    }

    fn state_changed(&self, state: UploadState) {
        self.report_event(UploadProgressEvent::StateChanged { state });
    }

    fn batch_acquired(&self, batch_index: u32, first_part: u32, part_count: u32) {
        self.report_event(UploadProgressEvent::BatchAcquired {
            batch_index,
            first_part,
            part_count,
        });
    }

    fn part_uploaded(&self, part_number: u32, bytes: u64) {
        self.report_event(UploadProgressEvent::PartUploaded { part_number, bytes });
    }

    fn upload_completed(&self, result: &UploadResult) {
        self.report_event(UploadProgressEvent::UploadCompleted {
            result: result.clone(),
        });
    }
}
