use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use loglens_core::ClusteringConfig;

use crate::error::ClusteringError;
use crate::model::{ClusterAssignment, ClusterId, ClusterIdCounter, ModelSettings, TextCluster, TextClusteringModel};
use crate::preprocess::{DefaultPreprocessor, TextPreprocessor};
use crate::store::ClusterStore;
use crate::threshold::{LinearThreshold, ThresholdSetter};

/// Parent of one clustering model per component.
///
/// All child models draw ids from the same [`ClusterIdCounter`], so cluster
/// ids never collide across components. Models are created on first use.
pub struct TextClusterer {
    models: HashMap<String, TextClusteringModel>,
    counter: Arc<ClusterIdCounter>,
    preprocessor: Arc<dyn TextPreprocessor>,
    component_preprocessors: HashMap<String, Arc<dyn TextPreprocessor>>,
    magic_words: Vec<String>,
    threshold: Arc<dyn ThresholdSetter>,
    store: Option<Arc<dyn ClusterStore>>,
    settings: ModelSettings,
}

impl TextClusterer {
    pub fn new(config: &ClusteringConfig) -> Self {
        let mut clusterer = Self {
            models: HashMap::new(),
            counter: Arc::new(ClusterIdCounter::new()),
            preprocessor: Arc::new(DefaultPreprocessor::from_config(config)),
            component_preprocessors: HashMap::new(),
            magic_words: config.magic_words.clone(),
            threshold: Arc::new(LinearThreshold::new(config.threshold_delta, config.threshold_factor)),
            store: None,
            settings: ModelSettings::from(config),
        };
        for component in &config.whole_string_components {
            clusterer = clusterer.with_whole_string_component(component);
        }
        clusterer
    }

    /// Link a persistent store. New clusters are then inserted under its lock.
    pub fn with_store(mut self, store: Arc<dyn ClusterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn TextPreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_threshold(mut self, threshold: Arc<dyn ThresholdSetter>) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_component_preprocessor(
        mut self,
        component: &str,
        preprocessor: Arc<dyn TextPreprocessor>,
    ) -> Self {
        self.component_preprocessors
            .insert(component.to_string(), preprocessor);
        self
    }

    /// Compare texts of `component` as single opaque tokens.
    pub fn with_whole_string_component(self, component: &str) -> Self {
        let preprocessor = DefaultPreprocessor::new(&self.magic_words).whole_string();
        self.with_component_preprocessor(component, Arc::new(preprocessor))
    }

    /// Preload every stored cluster and seed the shared counter with the
    /// store max. Returns the number of clusters loaded.
    pub fn load_from_store(&mut self) -> Result<usize, ClusteringError> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };
        let clusters = store.load_all().map_err(|source| ClusteringError::Store {
            component: "*".to_string(),
            operation: "load all",
            source,
        })?;
        let store_max = clusters.iter().map(|c| c.id).max();

        let mut by_component: HashMap<String, Vec<TextCluster>> = HashMap::new();
        for cluster in clusters {
            by_component
                .entry(cluster.component.clone())
                .or_default()
                .push(cluster);
        }

        let mut loaded = 0;
        for (component, clusters) in by_component {
            loaded += self.model_mut(&component).merge(clusters);
        }
        if let Some(max) = store_max {
            self.counter.observe(max);
        }
        for model in self.models.values_mut() {
            model.mark_synced(store_max);
        }

        info!(
            clusters = loaded,
            components = self.models.len(),
            max_cluster_id = ?store_max,
            "loaded text clusters from store"
        );
        Ok(loaded)
    }

    /// Assign `text` observed at `timestamp` to a cluster of `component`.
    pub fn get_or_add_cluster(
        &mut self,
        component: &str,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ClusterAssignment, ClusteringError> {
        let store = self.store.clone();
        self.model_mut(component)
            .get_or_add_cluster(text, timestamp, store.as_deref())
    }

    pub fn model(&self, component: &str) -> Option<&TextClusteringModel> {
        self.models.get(component)
    }

    /// Clusters of `component`, most recently matched first.
    pub fn clusters(&self, component: &str) -> Vec<&TextCluster> {
        self.models
            .get(component)
            .map(|m| m.clusters().collect())
            .unwrap_or_default()
    }

    pub fn cluster_count(&self) -> usize {
        self.models.values().map(TextClusteringModel::len).sum()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Largest id handed out by any child model.
    pub fn max_cluster_id(&self) -> Option<ClusterId> {
        self.counter.max_assigned()
    }

    fn model_mut(&mut self, component: &str) -> &mut TextClusteringModel {
        self.models
            .entry(component.to_string())
            .or_insert_with(|| {
                let preprocessor = self
                    .component_preprocessors
                    .get(component)
                    .cloned()
                    .unwrap_or_else(|| self.preprocessor.clone());
                TextClusteringModel::new(
                    component,
                    self.counter.clone(),
                    preprocessor,
                    self.threshold.clone(),
                    self.settings,
                )
            })
    }
}
