use crate::domain::Cursor;

/// 轮询参数 / Polling tuning
#[derive(Debug, Clone, Copy)]
pub struct PollTuning {
    pub interval_ms: i64,
    pub limit: usize,
}

impl Default for PollTuning {
    fn default() -> Self {
        PollTuning { interval_ms: 4_000, limit: 100 }
    }
}

/// 回退轮询器 / Fallback poller
///
/// 实时通道挂掉时按固定间隔从最后游标向前追赶；单飞闸防止轮次重叠。
/// 结果经与实时事件相同的规范化路径回灌，所以两条路径幂等合并。
/// When the realtime channel is down, catch up forward from the last known
/// cursor on a fixed interval; the in-flight guard prevents overlapping
/// rounds. Results re-enter through the same normalization path as live
/// events, so the two paths merge idempotently.
pub struct FallbackPoller {
    tuning: PollTuning,
    live: bool,
    in_flight: bool,
    next_poll_at: i64,
    cursor: Option<Cursor>,
}

impl FallbackPoller {
    pub fn new(tuning: PollTuning) -> Self {
        FallbackPoller { tuning, live: false, in_flight: false, next_poll_at: 0, cursor: None }
    }

    /// 实时订阅挂上即停 / Stops as soon as a live subscription attaches
    pub fn on_transport_up(&mut self) {
        self.live = true;
    }

    /// 订阅掉线自动恢复 / Resumes automatically when the subscription drops
    pub fn on_transport_down(&mut self, now: i64) {
        self.live = false;
        self.next_poll_at = self.next_poll_at.max(now);
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// 到点则占用单飞闸并交出游标 / Claims the in-flight guard and hands out
    /// the cursor when a round is due
    pub fn due(&mut self, now: i64) -> Option<Option<Cursor>> {
        if self.live || self.in_flight || now < self.next_poll_at {
            return None;
        }
        self.in_flight = true;
        Some(self.cursor)
    }

    pub fn complete(&mut self, now: i64) {
        self.in_flight = false;
        self.next_poll_at = now + self.tuning.interval_ms;
    }

    /// 实时与轮询路径都推进同一游标 / Both the live and polling paths advance
    /// the same cursor
    pub fn advance_cursor(&mut self, cursor: Cursor) {
        if self.cursor.map_or(true, |c| (cursor.at, cursor.id) > (c.at, c.id)) {
            self.cursor = Some(cursor);
        }
    }

    pub fn limit(&self) -> usize {
        self.tuning.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_prevents_overlap() {
        let mut p = FallbackPoller::new(PollTuning::default());
        p.on_transport_down(1_000);
        assert!(p.due(1_000).is_some());
        assert!(p.due(1_001).is_none());
        p.complete(1_500);
        assert!(p.due(1_600).is_none());
        assert!(p.due(5_500).is_some());
    }

    #[test]
    fn live_subscription_stops_polling() {
        let mut p = FallbackPoller::new(PollTuning::default());
        p.on_transport_down(1_000);
        p.on_transport_up();
        assert!(p.due(10_000).is_none());
        p.on_transport_down(10_500);
        assert!(p.due(10_500).is_some());
    }

    #[test]
    fn cursor_only_moves_forward() {
        let mut p = FallbackPoller::new(PollTuning::default());
        p.advance_cursor(Cursor { at: 100, id: 42 });
        p.advance_cursor(Cursor { at: 100, id: 41 });
        p.on_transport_down(0);
        assert_eq!(p.due(0), Some(Some(Cursor { at: 100, id: 42 })));
    }
}
