use ndarray::{Array1, Array3, Axis};

/// Pump laser condition of a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PumpState {
    On,
    Off,
}

impl PumpState {
    pub fn from_flag(flag: bool) -> Self {
        if flag {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "pon",
            Self::Off => "poff",
        }
    }
}

/// All shots of one file that survived the timestamp join, in image-block order.
///
/// Row `i` of every field belongs to the same exposure.
#[derive(Debug, Clone)]
pub struct ShotTable {
    pub timestamps: Vec<i64>,
    pub images: Array3<f64>,
    pub beam_intensity: Array1<f64>,
    pub pump_state: Vec<bool>,
}

impl ShotTable {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Split the shots by pump state. Empty partitions are left out.
    pub fn into_bundle(self, delay: f64) -> ShotBundle {
        let mut partitions = Vec::with_capacity(2);
        for state in [PumpState::On, PumpState::Off] {
            let wanted = state == PumpState::On;
            let indices: Vec<usize> = self
                .pump_state
                .iter()
                .enumerate()
                .filter(|(_, &flag)| flag == wanted)
                .map(|(idx, _)| idx)
                .collect();
            if indices.is_empty() {
                continue;
            }
            partitions.push(Partition {
                state,
                images: self.images.select(Axis(0), &indices),
                beam_intensity: self.beam_intensity.select(Axis(0), &indices),
            });
        }
        ShotBundle { delay, partitions }
    }
}

/// The shots of one pump state within a scan step
#[derive(Debug, Clone)]
pub struct Partition {
    pub state: PumpState,
    pub images: Array3<f64>,
    pub beam_intensity: Array1<f64>,
}

impl Partition {
    pub fn n_shots(&self) -> usize {
        self.beam_intensity.len()
    }
}

/// Everything a loader extracts from one shot file
#[derive(Debug, Clone)]
pub struct ShotBundle {
    pub delay: f64,
    pub partitions: Vec<Partition>,
}

impl ShotBundle {
    pub fn partition(&self, state: PumpState) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.state == state)
    }

    pub fn n_shots(&self) -> usize {
        self.partitions.iter().map(|p| p.n_shots()).sum()
    }
}
