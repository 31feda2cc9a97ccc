use fxhash::FxHashSet;
use std::sync::Arc;

use super::config::{PipelineConfig, StageConfig};
use super::correction::{
    BrightnessEqualize, CorrectionStage, DarkSubtract, LinearConfidenceBandFilter,
    PositivityShift, QbpmNormalize, RansacOutlierFilter, ShotStack,
};
use super::dark_frame::DarkFrame;
use super::error::PipelineError;

/// A named, ordered chain of correction stages
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn CorrectionStage>>,
}

impl Pipeline {
    pub fn new(name: &str, stages: Vec<Box<dyn CorrectionStage>>) -> Self {
        Self {
            name: name.to_string(),
            stages,
        }
    }

    /// Build the stages of a configured pipeline, handing the dark frame to the stages
    /// that need it. Fails if a stage needs the dark frame and there is none.
    pub fn from_config(
        config: &PipelineConfig,
        dark: Option<Arc<DarkFrame>>,
    ) -> Result<Self, PipelineError> {
        let stages: Vec<Box<dyn CorrectionStage>> = config
            .stages
            .iter()
            .map(|stage| build_stage(stage, dark.clone()))
            .collect();
        if dark.is_none() && stages.iter().any(|s| s.uses_dark_frame()) {
            return Err(PipelineError::DarkFrameRequired(config.name.clone()));
        }
        Ok(Self::new(&config.name, stages))
    }

    /// Build every configured pipeline. Names must be unique since they name the outputs.
    ///
    /// A pipeline that needs the dark frame when there is none is left out with a warning;
    /// the others still run. Fails only if no pipeline is left.
    pub fn from_configs(
        configs: &[PipelineConfig],
        dark: Option<Arc<DarkFrame>>,
    ) -> Result<Vec<Self>, PipelineError> {
        let mut seen = FxHashSet::default();
        let mut pipelines = Vec::with_capacity(configs.len());
        let mut first_skipped: Option<PipelineError> = None;
        for config in configs {
            if !seen.insert(config.name.as_str()) {
                return Err(PipelineError::DuplicateName(config.name.clone()));
            }
            match Self::from_config(config, dark.clone()) {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e @ PipelineError::DarkFrameRequired(_)) => {
                    log::warn!("{e}; skipping pipeline '{}'", config.name);
                    first_skipped.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        match (pipelines.is_empty(), first_skipped) {
            (true, Some(e)) => Err(e),
            _ => Ok(pipelines),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the stages strictly in order, first to last
    pub fn apply(&self, stack: ShotStack) -> Result<ShotStack, PipelineError> {
        let mut stack = stack;
        for stage in self.stages.iter() {
            stack = stage
                .apply(stack)
                .map_err(|source| PipelineError::StageFailed {
                    pipeline: self.name.clone(),
                    stage: stage.name().to_string(),
                    source,
                })?;
        }
        Ok(stack)
    }
}

fn build_stage(stage: &StageConfig, dark: Option<Arc<DarkFrame>>) -> Box<dyn CorrectionStage> {
    match stage {
        StageConfig::DarkSubtract => Box::new(DarkSubtract::new(dark)),
        StageConfig::QbpmNormalize => Box::new(QbpmNormalize),
        StageConfig::BrightnessEqualize => Box::new(BrightnessEqualize),
        StageConfig::RansacOutlierFilter(settings) => Box::new(RansacOutlierFilter::new(settings)),
        StageConfig::LinearConfidenceBandFilter { sigma } => {
            Box::new(LinearConfidenceBandFilter::new(*sigma))
        }
        StageConfig::PositivityShift => Box::new(PositivityShift),
    }
}
