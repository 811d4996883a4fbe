pub mod arxiv;
pub mod openalex;
pub mod pubmed;
pub mod traits;

pub use arxiv::ArxivProvider;
pub use openalex::OpenAlexProvider;
pub use pubmed::{Etiquette, PubMedProvider};
pub use traits::{
    get_text, is_request_url, ProviderError, ProviderSettings, SourceProvider, SourceResult,
};

use crate::client::SourceName;
use crate::config::ResearchSourceConfig;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Providers keyed by source, in source order
pub type ProviderMap = BTreeMap<SourceName, Arc<dyn SourceProvider>>;

/// Build the arXiv, PubMed and OpenAlex providers from configuration
pub fn default_providers(config: &ResearchSourceConfig) -> crate::Result<ProviderMap> {
    let mut providers: ProviderMap = BTreeMap::new();
    providers.insert(SourceName::Arxiv, Arc::new(ArxivProvider::from_config(config)?));
    providers.insert(SourceName::Pubmed, Arc::new(PubMedProvider::from_config(config)?));
    providers.insert(
        SourceName::Openalex,
        Arc::new(OpenAlexProvider::from_config(config)?),
    );
    Ok(providers)
}
