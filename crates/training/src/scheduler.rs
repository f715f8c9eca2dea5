//! Reduce-on-plateau learning-rate control for a minimised metric.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateauConfig {
    /// Multiplier applied on plateau.
    pub factor: f64,
    /// Non-improving epochs tolerated before reducing.
    pub patience: usize,
    /// Relative improvement required over the best value.
    pub threshold: f64,
    pub cooldown: usize,
    pub min_lr: f64,
    /// Reductions smaller than this are skipped.
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.2,
            patience: 5,
            threshold: 1e-4,
            cooldown: 0,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    cfg: PlateauConfig,
    lr: f64,
    best: f64,
    num_bad_epochs: usize,
    cooldown_counter: usize,
}

impl PlateauScheduler {
    pub fn new(initial_lr: f64, cfg: PlateauConfig) -> Self {
        Self {
            cfg,
            lr: initial_lr,
            best: f64::INFINITY,
            num_bad_epochs: 0,
            cooldown_counter: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    fn is_better(&self, metric: f64) -> bool {
        metric < self.best * (1.0 - self.cfg.threshold)
    }

    /// Feeds one epoch's metric. Returns the new learning rate when it was reduced.
    pub fn step(&mut self, metric: f64) -> Option<f64> {
        if self.is_better(metric) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs <= self.cfg.patience {
            return None;
        }
        self.cooldown_counter = self.cfg.cooldown;
        self.num_bad_epochs = 0;
        let reduced = (self.lr * self.cfg.factor).max(self.cfg.min_lr);
        if self.lr - reduced > self.cfg.eps {
            self.lr = reduced;
            Some(reduced)
        } else {
            None
        }
    }
}
