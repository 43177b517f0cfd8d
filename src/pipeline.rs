//! A small memoizing computation graph.
//!
//! Components declare the artifacts they provide and the artifacts they
//! depend on. Asking the graph for an artifact pulls its whole dependency
//! chain, caching every intermediate value, so repeated queries against the
//! same scan cost nothing. Swapping a component invalidates exactly the
//! artifacts downstream of it.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use image::GrayImage;
use thiserror::Error;

use crate::core::geometry::RotatedBox;
use crate::core::record::MrzRecord;

/// A value flowing through the graph.
#[derive(Debug, Clone)]
pub enum Artifact {
    Gray(GrayImage),
    Scalar(f64),
    Boxes(Vec<RotatedBox>),
    Record(Box<MrzRecord>),
}

impl Artifact {
    pub fn gray(&self) -> Result<&GrayImage> {
        match self {
            Artifact::Gray(img) => Ok(img),
            _ => bail!("expected a grayscale image artifact"),
        }
    }

    pub fn scalar(&self) -> Result<f64> {
        match self {
            Artifact::Scalar(v) => Ok(*v),
            _ => bail!("expected a scalar artifact"),
        }
    }

    pub fn boxes(&self) -> Result<&[RotatedBox]> {
        match self {
            Artifact::Boxes(b) => Ok(b),
            _ => bail!("expected a box-list artifact"),
        }
    }

    pub fn record(&self) -> Result<&MrzRecord> {
        match self {
            Artifact::Record(r) => Ok(r),
            _ => bail!("expected a record artifact"),
        }
    }
}

/// One processing step. Outputs are positional: `compute` must return one
/// artifact per `provides` entry, in the same order.
pub trait Component {
    fn provides(&self) -> &[&'static str];
    fn depends(&self) -> &[&'static str];
    fn compute(&self, inputs: &[Artifact]) -> Result<Vec<Artifact>>;
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("component `{0}` is already registered")]
    DuplicateComponent(String),
    #[error("artifact `{0}` already has a provider")]
    DuplicateProvider(String),
    #[error("no component named `{0}`")]
    UnknownComponent(String),
    #[error("no component provides artifact `{0}`")]
    UnknownArtifact(String),
    #[error("component `{component}` produced {got} artifacts, expected {expected}")]
    OutputArity {
        component: String,
        got: usize,
        expected: usize,
    },
}

#[derive(Default)]
pub struct PipelineGraph {
    components: HashMap<String, Box<dyn Component>>,
    providers: HashMap<String, String>,
    cache: HashMap<String, Artifact>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a component under a unique name. Each artifact may have only
    /// one provider across the whole graph.
    pub fn register(
        &mut self,
        name: &str,
        component: Box<dyn Component>,
    ) -> Result<(), PipelineError> {
        if self.components.contains_key(name) {
            return Err(PipelineError::DuplicateComponent(name.to_string()));
        }
        for key in component.provides() {
            if self.providers.contains_key(*key) {
                return Err(PipelineError::DuplicateProvider(key.to_string()));
            }
        }
        for key in component.provides() {
            self.providers.insert(key.to_string(), name.to_string());
        }
        self.components.insert(name.to_string(), component);
        Ok(())
    }

    /// Swaps the component registered under `name`, dropping every cached
    /// artifact downstream of either the old or the new one.
    pub fn replace(
        &mut self,
        name: &str,
        component: Box<dyn Component>,
    ) -> Result<(), PipelineError> {
        for key in component.provides() {
            if self.providers.get(*key).is_some_and(|p| p != name) {
                return Err(PipelineError::DuplicateProvider(key.to_string()));
            }
        }
        let Some(old) = self.components.remove(name) else {
            return Err(PipelineError::UnknownComponent(name.to_string()));
        };
        let mut stale: Vec<String> = old.provides().iter().map(|s| s.to_string()).collect();
        stale.extend(component.provides().iter().map(|s| s.to_string()));
        self.providers.retain(|_, provider| provider != name);
        for key in component.provides() {
            self.providers.insert(key.to_string(), name.to_string());
        }
        self.components.insert(name.to_string(), component);
        for key in stale {
            self.invalidate(&key);
        }
        Ok(())
    }

    /// Seeds an artifact directly, bypassing its provider if any. Cached
    /// values downstream of the key are dropped first.
    pub fn set(&mut self, key: &str, value: Artifact) {
        self.invalidate(key);
        self.cache.insert(key.to_string(), value);
    }

    /// Drops `key` and every cached artifact transitively depending on it.
    pub fn invalidate(&mut self, key: &str) {
        let mut stale = vec![key.to_string()];
        let mut i = 0;
        while i < stale.len() {
            for component in self.components.values() {
                if component.depends().iter().any(|d| *d == stale[i]) {
                    for out in component.provides() {
                        if !stale.iter().any(|s| s == out) {
                            stale.push(out.to_string());
                        }
                    }
                }
            }
            i += 1;
        }
        for key in stale {
            self.cache.remove(&key);
        }
    }

    /// Computes (or fetches from cache) the artifact with the given key,
    /// pulling its dependency chain as needed.
    pub fn get(&mut self, key: &str) -> Result<Artifact> {
        if let Some(value) = self.cache.get(key) {
            return Ok(value.clone());
        }
        let name = self
            .providers
            .get(key)
            .ok_or_else(|| PipelineError::UnknownArtifact(key.to_string()))?
            .clone();
        let (depends, provides) = {
            let component = self
                .components
                .get(&name)
                .ok_or_else(|| PipelineError::UnknownComponent(name.clone()))?;
            (
                component.depends().to_vec(),
                component.provides().to_vec(),
            )
        };
        let mut inputs = Vec::with_capacity(depends.len());
        for dep in &depends {
            inputs.push(self.get(dep)?);
        }
        let outputs = self
            .components
            .get(&name)
            .ok_or_else(|| PipelineError::UnknownComponent(name.clone()))?
            .compute(&inputs)
            .with_context(|| format!("component `{name}` failed"))?;
        if outputs.len() != provides.len() {
            return Err(PipelineError::OutputArity {
                component: name,
                got: outputs.len(),
                expected: provides.len(),
            }
            .into());
        }
        for (out_key, value) in provides.iter().zip(outputs) {
            self.cache.insert(out_key.to_string(), value);
        }
        self.cache
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownArtifact(key.to_string()).into())
    }
}
