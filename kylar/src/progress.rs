/// Receives `(total progress in [0, 1], action, detail)`.
pub type ProgressCallback = Box<dyn Fn(f32, &str, &str) + Send>;

/// Progress collaborator threaded through the long-running operations.
pub struct Progress {
    callback: ProgressCallback,
}

impl Progress {
    pub fn new(callback: ProgressCallback) -> Self {
        Self { callback }
    }

    fn report(&self, total: f32, action: &str, detail: &str) {
        (self.callback)(total, action, detail);
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(Box::new(|_, _, _| {}))
    }
}

/// Accumulates per-stage progress into one total. An operation declares its
/// stage count up front, advances through named stages, and ticks items
/// within each stage.
pub struct ProgressHelper<'a> {
    progress: &'a Progress,
    stage_count: i64,
    current_stage: i64,
    stage_target: i64,
    current: i64,
    stage_name: String,
    action: String,
}

impl<'a> ProgressHelper<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            stage_count: 1,
            current_stage: -1,
            stage_target: 0,
            current: 0,
            stage_name: String::new(),
            action: String::new(),
        }
    }

    pub fn start(&mut self, stage_count: i64) {
        assert!(stage_count > 0);
        self.stage_count = stage_count;
        self.current_stage = -1;
    }

    pub fn advance_stage(&mut self, stage_name: &str) {
        self.current_stage += 1;
        self.stage_name = stage_name.to_owned();
        self.stage_target = 0;
        self.current = 0;
        self.progress
            .report(self.total_progress(), &self.stage_name, "");
    }

    pub fn set_stage_target(&mut self, target: i64) {
        self.stage_target = target;
    }

    pub fn set_action(&mut self, action: &str) {
        self.action = action.to_owned();
    }

    /// One item of the current stage is done.
    pub fn advance(&mut self) {
        self.current += 1;
        self.progress
            .report(self.total_progress(), &self.stage_name, &self.action);
    }

    fn total_progress(&self) -> f32 {
        let stage = self.current_stage.max(0) as f32;
        let in_stage = if self.stage_target > 0 {
            (self.current as f32 / self.stage_target as f32).min(1.0)
        } else {
            0.0
        };
        ((stage + in_stage) / self.stage_count as f32).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn progress_reaches_one() {
        let (sender, receiver) = mpsc::channel();
        let progress = Progress::new(Box::new(move |total, action, _| {
            sender.send((total, action.to_owned())).unwrap();
        }));
        let mut helper = ProgressHelper::new(&progress);
        helper.start(2);
        helper.advance_stage("setup");
        helper.set_stage_target(1);
        helper.advance();
        helper.advance_stage("install");
        helper.set_stage_target(2);
        helper.set_action("a");
        helper.advance();
        helper.advance();

        let reports: Vec<_> = receiver.try_iter().collect();
        let last = reports.last().unwrap();
        assert!((last.0 - 1.0).abs() < f32::EPSILON);
        assert_eq!(last.1, "install");
        // Progress never decreases
        for pair in reports.windows(2) {
            assert!(pair[1].0 >= pair[0].0);
        }
    }
}
