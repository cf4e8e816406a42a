use std::collections::HashMap;

/// 视口观察参数 / Viewport observation tuning
#[derive(Debug, Clone, Copy)]
pub struct VisibilityTuning {
    pub ratio_threshold: f64,
    pub dwell_ms: i64,
    pub debounce_ms: i64,
}

impl Default for VisibilityTuning {
    fn default() -> Self {
        VisibilityTuning { ratio_threshold: 0.6, dwell_ms: 600, debounce_ms: 350 }
    }
}

/// 单次视口采样 / One viewport sample
///
/// 没有原生交叉观察原语的平台按固定节拍对包围盒取样即可，
/// 驻留计时逻辑与平台无关。
/// Platforms without a native intersection primitive sample bounding boxes
/// at a fixed tick rate; the dwell timing below is platform-independent.
#[derive(Debug, Clone, Copy)]
pub struct VisibilitySample {
    pub ratio: f64,
    pub view_focused: bool,
    pub window_focused: bool,
}

impl VisibilitySample {
    fn qualifies(&self, threshold: f64) -> bool {
        self.ratio >= threshold && self.view_focused && self.window_focused
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Unseen,
    Dwelling { since: i64 },
    Seen,
}

struct TrackedLine {
    state: LineState,
    message_at: i64,
    eligible: bool,
    last_sample: Option<VisibilitySample>,
}

/// 按行状态机：unseen -> dwelling -> seen
/// Per-line state machine: unseen -> dwelling -> seen
///
/// seen 只进不退；失焦只阻止新的晋升，不回滚已提交的。观察到 seen 的
/// 最高时间戳即乐观已读水位，去抖后合并成一次权威 mark_read 调用。
/// `seen` never reverts; losing focus only halts new promotions. The
/// highest seen timestamp is the optimistic read watermark, debounced into
/// a single authoritative mark_read call.
pub struct VisibilityTracker {
    tuning: VisibilityTuning,
    lines: HashMap<u64, TrackedLine>,
    highest_seen_at: Option<i64>,
    pending_flush_at: Option<i64>,
}

impl VisibilityTracker {
    pub fn new(tuning: VisibilityTuning) -> Self {
        VisibilityTracker { tuning, lines: HashMap::new(), highest_seen_at: None, pending_flush_at: None }
    }

    /// 登记渲染行；只有他人发的非系统行参与
    /// Register a rendered line; only other-authored, non-system lines
    /// participate
    pub fn track(&mut self, message_id: u64, message_at: i64, eligible: bool) {
        self.lines.entry(message_id).or_insert(TrackedLine {
            state: LineState::Unseen,
            message_at,
            eligible,
            last_sample: None,
        });
    }

    pub fn untrack(&mut self, message_id: u64) {
        self.lines.remove(&message_id);
    }

    /// 采样驱动状态迁移；返回新的乐观水位（若推进）
    /// Sample-driven transition; returns the new optimistic watermark when
    /// it advances
    pub fn observe(&mut self, message_id: u64, sample: VisibilitySample, now: i64) -> Option<i64> {
        let threshold = self.tuning.ratio_threshold;
        let dwell = self.tuning.dwell_ms;
        let line = self.lines.get_mut(&message_id)?;
        line.last_sample = Some(sample);
        if !line.eligible || line.state == LineState::Seen {
            return None;
        }
        match line.state {
            LineState::Unseen if sample.qualifies(threshold) => {
                line.state = LineState::Dwelling { since: now };
                None
            }
            LineState::Dwelling { .. } if sample.ratio < threshold => {
                // 驻留计时未满便离开视口 / left the viewport before the
                // dwell timer elapsed
                line.state = LineState::Unseen;
                None
            }
            LineState::Dwelling { since }
                if sample.qualifies(threshold) && now - since >= dwell =>
            {
                line.state = LineState::Seen;
                let at = line.message_at;
                self.commit_seen(at, now)
            }
            _ => None,
        }
    }

    /// 周期节拍：晋升驻留期满且仍在视口内的行
    /// Periodic tick: promote dwellers whose timer elapsed while still
    /// intersecting
    pub fn tick(&mut self, now: i64) -> Option<i64> {
        let threshold = self.tuning.ratio_threshold;
        let dwell = self.tuning.dwell_ms;
        let mut advanced = None;
        let due: Vec<(u64, i64)> = self
            .lines
            .iter()
            .filter_map(|(id, line)| match (line.state, line.last_sample) {
                (LineState::Dwelling { since }, Some(sample))
                    if line.eligible && sample.qualifies(threshold) && now - since >= dwell =>
                {
                    Some((*id, line.message_at))
                }
                _ => None,
            })
            .collect();
        for (id, at) in due {
            if let Some(line) = self.lines.get_mut(&id) {
                line.state = LineState::Seen;
            }
            if let Some(watermark) = self.commit_seen(at, now) {
                advanced = Some(watermark);
            }
        }
        advanced
    }

    fn commit_seen(&mut self, message_at: i64, now: i64) -> Option<i64> {
        if self.highest_seen_at.map_or(false, |h| message_at <= h) {
            return None;
        }
        self.highest_seen_at = Some(message_at);
        // 去抖窗口内的后续 seen 并入同一次写 / later seens inside the window
        // coalesce into the same write
        if self.pending_flush_at.is_none() {
            self.pending_flush_at = Some(now + self.tuning.debounce_ms);
        }
        self.highest_seen_at
    }

    /// 去抖到期则取走待写水位 / Take the pending watermark once the debounce
    /// deadline passes
    pub fn due_flush(&mut self, now: i64) -> Option<i64> {
        match self.pending_flush_at {
            Some(deadline) if now >= deadline => {
                self.pending_flush_at = None;
                self.highest_seen_at
            }
            _ => None,
        }
    }

    /// 卸载时丢弃未写出的去抖 / Drop the pending debounce on teardown
    pub fn cancel_pending(&mut self) {
        self.pending_flush_at = None;
    }

    pub fn highest_seen_at(&self) -> Option<i64> {
        self.highest_seen_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible() -> VisibilitySample {
        VisibilitySample { ratio: 0.8, view_focused: true, window_focused: true }
    }

    fn tracker() -> VisibilityTracker {
        VisibilityTracker::new(VisibilityTuning::default())
    }

    #[test]
    fn dwell_then_seen_advances_watermark() {
        let mut t = tracker();
        t.track(1, 100, true);
        assert_eq!(t.observe(1, visible(), 1_000), None);
        assert_eq!(t.observe(1, visible(), 1_700), Some(100));
        assert_eq!(t.highest_seen_at(), Some(100));
    }

    #[test]
    fn leaving_viewport_before_dwell_reverts() {
        let mut t = tracker();
        t.track(1, 100, true);
        t.observe(1, visible(), 1_000);
        let gone = VisibilitySample { ratio: 0.1, view_focused: true, window_focused: true };
        assert_eq!(t.observe(1, gone, 1_300), None);
        // 重新进入要重新驻留 / re-entry restarts the dwell
        t.observe(1, visible(), 2_000);
        assert_eq!(t.observe(1, visible(), 2_500), None);
        assert_eq!(t.observe(1, visible(), 2_700), Some(100));
    }

    #[test]
    fn focus_loss_halts_promotion_without_revert() {
        let mut t = tracker();
        t.track(1, 100, true);
        t.observe(1, visible(), 1_000);
        let unfocused = VisibilitySample { ratio: 0.8, view_focused: true, window_focused: false };
        assert_eq!(t.observe(1, unfocused, 1_700), None);
        assert_eq!(t.tick(1_800), None);
        // 焦点回来后晋升 / promotes once focus returns
        assert_eq!(t.observe(1, visible(), 1_900), Some(100));
    }

    #[test]
    fn ineligible_lines_never_promote() {
        let mut t = tracker();
        t.track(1, 100, false);
        t.observe(1, visible(), 1_000);
        assert_eq!(t.observe(1, visible(), 5_000), None);
        assert_eq!(t.highest_seen_at(), None);
    }

    #[test]
    fn tick_promotes_idle_dwellers() {
        let mut t = tracker();
        t.track(1, 100, true);
        t.observe(1, visible(), 1_000);
        assert_eq!(t.tick(1_500), None);
        assert_eq!(t.tick(1_650), Some(100));
    }

    #[test]
    fn burst_of_seens_coalesces_into_one_flush() {
        let mut t = tracker();
        t.track(1, 100, true);
        t.track(2, 200, true);
        t.observe(1, visible(), 1_000);
        t.observe(2, visible(), 1_050);
        t.observe(1, visible(), 1_600);
        t.observe(2, visible(), 1_700);
        // 去抖期内无写出 / nothing flushes inside the debounce window
        assert_eq!(t.due_flush(1_700), None);
        assert_eq!(t.due_flush(1_950), Some(200));
        assert_eq!(t.due_flush(2_000), None);
    }

    #[test]
    fn older_seen_does_not_regress_watermark() {
        let mut t = tracker();
        t.track(2, 200, true);
        t.track(1, 100, true);
        t.observe(2, visible(), 1_000);
        assert_eq!(t.observe(2, visible(), 1_600), Some(200));
        t.observe(1, visible(), 2_000);
        assert_eq!(t.observe(1, visible(), 2_600), None);
        assert_eq!(t.highest_seen_at(), Some(200));
    }
}
