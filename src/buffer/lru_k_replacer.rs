use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, OxbowError, Result, Timestamp};

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameAccessInfo {
    /// History of access timestamps, oldest at the front, at most k entries
    history: VecDeque<Timestamp>,
    /// Whether this frame is currently evictable
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    /// Records an access at the given timestamp, trimming to the newest k
    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Returns the backward k-distance at the current timestamp.
    /// `None` means the frame has fewer than k recorded accesses (+inf distance).
    fn k_distance(&self, current_timestamp: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            // With the history trimmed to k entries, the front is the
            // k-th most recent access.
            Some(current_timestamp - self.history[self.history.len() - k])
        }
    }

    /// Returns the oldest retained timestamp
    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

/// State guarded by the replacer's single mutex
struct ReplacerState {
    /// Access information for each known frame
    frames: HashMap<FrameId, FrameAccessInfo>,
    /// Monotonic logical clock, bumped on every recorded access
    current_timestamp: Timestamp,
    /// Number of evictable frames
    curr_size: usize,
}

/// LRU-K replacement policy.
///
/// The replacer evicts the evictable frame whose backward k-distance is
/// largest, where backward k-distance is the difference between the current
/// timestamp and the timestamp of the k-th most recent access.
///
/// A frame with fewer than k recorded accesses has +inf backward k-distance.
/// Ties (including the all-+inf case) are broken in favor of the frame whose
/// oldest retained timestamp is earliest, which degenerates to classical LRU
/// when no frame has full history.
///
/// A single mutex serializes all operations.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    capacity: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and frame capacity.
    pub fn new(k: usize, capacity: usize) -> Self {
        Self {
            k,
            capacity,
            state: Mutex::new(ReplacerState {
                frames: HashMap::new(),
                current_timestamp: 0,
                curr_size: 0,
            }),
        }
    }

    /// Evicts the frame with the largest backward k-distance.
    /// Returns `None` if there are no evictable frames. On success the
    /// victim's access history is erased.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        if state.curr_size == 0 {
            return None;
        }

        let current_ts = state.current_timestamp;

        let mut victim: Option<FrameId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest: Option<Timestamp> = None;

        for (frame_id, info) in state.frames.iter() {
            if !info.is_evictable {
                continue;
            }

            let k_dist = info.k_distance(current_ts, self.k);
            let earliest = info.earliest_timestamp();

            let should_replace = match (victim_k_dist, k_dist) {
                // Victim has +inf, candidate is finite: keep the victim
                (None, Some(_)) => false,
                // Victim is finite, candidate has +inf: take the candidate
                (Some(_), None) => true,
                // Equal-distance cases fall back to the earliest first access
                (None, None) => earliest < victim_earliest,
                (Some(v_dist), Some(c_dist)) => {
                    c_dist > v_dist || (c_dist == v_dist && earliest < victim_earliest)
                }
            };

            if victim.is_none() || should_replace {
                victim = Some(*frame_id);
                victim_k_dist = k_dist;
                victim_earliest = earliest;
            }
        }

        if let Some(frame_id) = victim {
            state.frames.remove(&frame_id);
            state.curr_size -= 1;
        }

        victim
    }

    /// Records that the given frame was accessed, at a fresh logical
    /// timestamp. Unknown frames get a new entry that starts out
    /// non-evictable.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame(frame_id)?;

        let mut state = self.state.lock();
        state.current_timestamp += 1;
        let timestamp = state.current_timestamp;

        state
            .frames
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new)
            .record_access(timestamp, self.k);

        Ok(())
    }

    /// Toggles whether a frame is evictable, maintaining the evictable
    /// count. A no-op for frames the replacer has never seen.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) -> Result<()> {
        self.check_frame(frame_id)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(info) = state.frames.get_mut(&frame_id) {
            if info.is_evictable != is_evictable {
                info.is_evictable = is_evictable;
                if is_evictable {
                    state.curr_size += 1;
                } else {
                    state.curr_size -= 1;
                }
            }
        }

        Ok(())
    }

    /// Removes a frame and its history from the replacer, regardless of its
    /// k-distance. Removing a non-evictable frame is a caller bug and fails
    /// with `BusyFrame`; removing an unknown frame is a no-op.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        let mut state = self.state.lock();

        let Some(info) = state.frames.get(&frame_id) else {
            return Ok(());
        };
        if !info.is_evictable {
            debug_assert!(false, "remove on non-evictable frame {frame_id}");
            return Err(OxbowError::BusyFrame(frame_id));
        }

        state.frames.remove(&frame_id);
        state.curr_size -= 1;
        Ok(())
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }

    fn check_frame(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.capacity {
            debug_assert!(false, "frame {frame_id} out of range");
            return Err(OxbowError::FrameOutOfRange(frame_id));
        }
        Ok(())
    }
}
