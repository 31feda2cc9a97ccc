/// Color of a worker's progress bar; cyan while reducing files, green once the worker is done
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    GREEN,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub scan_number: i32,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, scan_number: i32, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            scan_number,
            worker_id,
            color,
        }
    }
}
