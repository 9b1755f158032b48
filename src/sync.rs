//! Lidar-referenced stream synchronization
//!
//! Every lidar frame gets the next index in its own sequence. For each camera
//! topic it is paired with the closest camera frame not yet consumed, provided the
//! gap is within the tolerance. Pairing is monotonic: a consumed frame and every
//! frame before it are discarded, so no camera frame is claimed twice. When two
//! candidates are equally close, the earlier one wins.
//!
//! [`Synchronizer`] works online over a time-ordered record stream and holds only
//! frames inside the tolerance window. [`synchronize`] is the batch form and gives
//! identical pairs.

use crate::frame::{ImageFrame, PointCloudFrame};
use std::collections::{BTreeMap, VecDeque};

/// One index of the output: a lidar frame and its matched camera frames
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedPair {
    pub index: usize,
    pub lidar: PointCloudFrame,
    /// Matched frame per camera topic; topics without a match are absent
    pub cameras: BTreeMap<String, ImageFrame>,
}

/// Streaming synchronizer
#[derive(Debug)]
pub struct Synchronizer {
    tolerance: u64,
    cameras: BTreeMap<String, VecDeque<ImageFrame>>,
    pending: VecDeque<PointCloudFrame>,
    next_index: usize,
}

impl Synchronizer {
    /// Create a synchronizer; `tolerance` is in nanoseconds
    pub fn new<I, S>(tolerance: u64, camera_topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tolerance,
            cameras: camera_topics
                .into_iter()
                .map(|topic| (topic.into(), VecDeque::new()))
                .collect(),
            pending: VecDeque::new(),
            next_index: 0,
        }
    }

    /// Queue a lidar frame; it is paired once the watermark has passed its window
    pub fn push_lidar(&mut self, frame: PointCloudFrame) {
        self.pending.push_back(frame);
    }

    /// Queue a camera frame on `topic`
    pub fn push_camera(&mut self, topic: &str, frame: ImageFrame) {
        match self.cameras.get_mut(topic) {
            Some(queue) => queue.push_back(frame),
            None => {
                self.cameras
                    .insert(topic.to_string(), VecDeque::from([frame]));
            }
        }
    }

    /// Finalize every lidar frame whose window closed before `watermark`
    ///
    /// Records are time-ordered, so by the time a record stamped `watermark`
    /// arrives every camera frame within `tolerance` of an older lidar frame has
    /// been seen.
    pub fn advance(&mut self, watermark: u64) -> Vec<SyncedPair> {
        let mut pairs = Vec::new();
        while let Some(front) = self.pending.front() {
            if front.timestamp.saturating_add(self.tolerance) >= watermark {
                break;
            }
            if let Some(lidar) = self.pending.pop_front() {
                pairs.push(self.pair(lidar));
            }
        }

        // Nothing older than this can match a pending or future lidar frame
        let horizon = self
            .pending
            .front()
            .map_or(watermark, |lidar| lidar.timestamp.min(watermark));
        self.discard_stale(horizon);
        pairs
    }

    /// Finalize all remaining lidar frames
    pub fn finish(&mut self) -> Vec<SyncedPair> {
        let mut pairs = Vec::with_capacity(self.pending.len());
        while let Some(lidar) = self.pending.pop_front() {
            pairs.push(self.pair(lidar));
        }
        pairs
    }

    /// Number of indices handed out so far
    pub fn frames_emitted(&self) -> usize {
        self.next_index
    }

    /// Camera frames currently buffered, over all topics
    pub fn buffered_camera_frames(&self) -> usize {
        self.cameras.values().map(VecDeque::len).sum()
    }

    fn discard_stale(&mut self, reference: u64) {
        let tolerance = self.tolerance;
        for queue in self.cameras.values_mut() {
            while queue
                .front()
                .is_some_and(|frame| frame.timestamp.saturating_add(tolerance) < reference)
            {
                queue.pop_front();
            }
        }
    }

    fn pair(&mut self, lidar: PointCloudFrame) -> SyncedPair {
        let index = self.next_index;
        self.next_index += 1;

        self.discard_stale(lidar.timestamp);

        let mut cameras = BTreeMap::new();
        for (topic, queue) in &mut self.cameras {
            if let Some(frame) = take_closest(queue, lidar.timestamp, self.tolerance) {
                cameras.insert(topic.clone(), frame);
            }
        }

        SyncedPair {
            index,
            lidar,
            cameras,
        }
    }
}

/// Consume the frame closest to `target` if it lies within `tolerance`
///
/// The queue is sorted and holds no frame older than `target - tolerance`, so the
/// distance falls and then rises along it. Frames repeating the previous
/// timestamp are stepped over; the scan stops at the first new timestamp that is
/// not strictly closer, which makes the earlier frame win a tie.
fn take_closest(queue: &mut VecDeque<ImageFrame>, target: u64, tolerance: u64) -> Option<ImageFrame> {
    let mut best = 0;
    let mut best_distance = queue.front()?.timestamp.abs_diff(target);
    let mut previous = queue[0].timestamp;
    for (position, frame) in queue.iter().enumerate().skip(1) {
        if frame.timestamp == previous {
            continue;
        }
        previous = frame.timestamp;
        let distance = frame.timestamp.abs_diff(target);
        if distance >= best_distance {
            break;
        }
        best = position;
        best_distance = distance;
    }

    if best_distance > tolerance {
        return None;
    }
    queue.drain(..best);
    queue.pop_front()
}

/// Batch synchronization over complete, time-sorted streams
pub fn synchronize(
    lidar: Vec<PointCloudFrame>,
    cameras: BTreeMap<String, Vec<ImageFrame>>,
    tolerance: u64,
) -> Vec<SyncedPair> {
    let mut synchronizer = Synchronizer::new(tolerance, cameras.keys().cloned());
    for (topic, frames) in cameras {
        for frame in frames {
            synchronizer.push_camera(&topic, frame);
        }
    }
    for frame in lidar {
        synchronizer.push_lidar(frame);
    }
    synchronizer.finish()
}
