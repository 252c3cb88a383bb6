/// Worker count and queue capacity used when a zero value is supplied.
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Construction parameters shared by every pool in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub name: String,
  pub workers: usize,
  pub queue_capacity: usize,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      name: "pool".to_string(),
      workers: DEFAULT_WORKERS,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
    }
  }
}

impl PoolConfig {
  pub fn new(workers: usize, queue_capacity: usize) -> Self {
    Self {
      workers,
      queue_capacity,
      ..Default::default()
    }
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
    self.queue_capacity = queue_capacity;
    self
  }

  /// Returns a copy with zero values raised to the library defaults.
  pub(crate) fn clamped(mut self) -> Self {
    if self.workers == 0 {
      self.workers = DEFAULT_WORKERS;
    }
    if self.queue_capacity == 0 {
      self.queue_capacity = DEFAULT_QUEUE_CAPACITY;
    }
    self
  }
}
