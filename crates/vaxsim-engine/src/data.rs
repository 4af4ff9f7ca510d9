//! Input data files: personas, social network, news corpora.
//!
//! All inputs are JSON:
//!
//! - profiles: an array of persona records (`Gender`, `Age`, ...)
//! - network: `{"num_nodes": N, "edges": [[a, b], ...]}`
//! - news: an array of `{"text": ..., "stance": "positive" | "negative"}`
//!
//! The risk series is CSV and lives in [`crate::risk`].

use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use vaxsim_agents::SocialGraph;
use vaxsim_core::Population;
use vaxsim_core::config::DataConfig;
use vaxsim_types::{Profile, Stance};

/// Spellings of the source disease that news text is rewritten from.
const SOURCE_DISEASE_NAMES: [&str; 6] = ["COVID-19", "covid-19", "Covid-19", "COVID", "covid", "Covid"];

/// Social network file layout.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkFile {
    /// Number of nodes; must match the number of profiles.
    pub num_nodes: usize,
    /// Undirected friendships.
    pub edges: Vec<(usize, usize)>,
}

/// One news article.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewsItem {
    /// Article text.
    pub text: String,
    /// Stance towards vaccination.
    #[serde(default)]
    pub stance: Stance,
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {what} file {}", path.display()))
}

/// Load persona profiles.
pub fn load_profiles(path: &Path) -> Result<Vec<Profile>> {
    let profiles: Vec<Profile> = read_json(path, "profiles")?;
    ensure!(!profiles.is_empty(), "profiles file {} is empty", path.display());
    Ok(profiles)
}

/// Load the social network.
pub fn load_network(path: &Path) -> Result<SocialGraph> {
    let network: NetworkFile = read_json(path, "network")?;
    SocialGraph::from_edges(network.num_nodes, network.edges)
        .with_context(|| format!("invalid network in {}", path.display()))
}

/// Load profiles and network and check they describe the same population.
pub fn load_population(data: &DataConfig) -> Result<Population> {
    let profiles = load_profiles(&data.profiles_path)?;
    let graph = load_network(&data.network_path)?;
    ensure!(
        profiles.len() == graph.node_count(),
        "{} profiles but the network has {} nodes",
        profiles.len(),
        graph.node_count()
    );
    Ok(Population { profiles, graph })
}

/// Load a news corpus, renaming the source disease to `disease`.
pub fn load_news(path: &Path, disease: &str) -> Result<Vec<NewsItem>> {
    let mut news: Vec<NewsItem> = read_json(path, "news")?;
    for item in &mut news {
        item.text = rename_disease(&item.text, disease);
    }
    Ok(news)
}

/// Replace every spelling of the source disease with `disease`.
pub fn rename_disease(text: &str, disease: &str) -> String {
    SOURCE_DISEASE_NAMES
        .iter()
        .fold(text.to_owned(), |acc, name| acc.replace(name, disease))
}

/// File stem of a news corpus, used to label runs.
pub fn news_handle(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "news".to_owned(), |stem| stem.to_string_lossy().into_owned())
}
