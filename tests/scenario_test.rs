//! End-to-end run against mocked arXiv, PubMed, OpenAlex and LLM endpoints.

use rust_research_orchestrator::client::{is_usable_content, SourceName};
use rust_research_orchestrator::query::OptimizerPath;
use rust_research_orchestrator::{Config, ResearchOrchestrator, ResearchRequest};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARXIV_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2501.00011v1</id>
    <published>2025-02-01T00:00:00Z</published>
    <title>Graph neural networks for materials property prediction</title>
    <summary>Crystal graphs.</summary>
    <author><name>Ada Lovelace</name></author>
    <link href="http://arxiv.org/abs/2501.00011v1" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2410.00012v1</id>
    <published>2024-10-01T00:00:00Z</published>
    <title>Message passing for molecules</title>
    <summary>Molecules.</summary>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/2410.00012v1" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2301.00013v1</id>
    <published>2023-01-01T00:00:00Z</published>
    <title>Older materials work</title>
    <summary>Older.</summary>
    <author><name>Grace Hopper</name></author>
    <link href="http://arxiv.org/abs/2301.00013v1" rel="alternate" type="text/html"/>
  </entry>
</feed>"#;

const PUBMED_EFETCH: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">39000042</PMID>
      <Article>
        <Journal><JournalIssue><PubDate><Year>2024</Year></PubDate></JournalIssue></Journal>
        <ArticleTitle>Neural models of biomaterials</ArticleTitle>
        <Abstract><AbstractText>Biomaterials.</AbstractText></Abstract>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

async fn mount_sources(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARXIV_FEED))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"esearchresult": {"count": "1", "idlist": ["39000042"]}}"#,
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/efetch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PUBMED_EFETCH))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": "https://openalex.org/W42",
                "display_name": "Graph networks accelerate materials discovery",
                "publication_year": 2025,
                "authorships": [{"author": {"display_name": "Marie Curie"}}],
                "primary_location": {"source": {"url": "https://journal.example/gnn"}}
            }]
        })))
        .mount(server)
        .await;
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.research_source.max_retries = 1;
    config.research_source.retry_base_delay_ms = 0;
    config.research_source.arxiv_base_url = format!("{}/api/query", server.uri());
    config.research_source.pubmed_base_url = format!("{}/entrez/eutils", server.uri());
    config.research_source.openalex_base_url = format!("{}/works", server.uri());
    config.llm.base_url = format!("{}/v1", server.uri());
    config.llm.api_key = Some("sk-test".to_string());
    config
}

#[tokio::test]
async fn test_graph_neural_networks_for_materials() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_string_contains("academic research librarian"))
        .respond_with(chat_reply(
            "```json\n{\"keywords\": [\"graph neural network\", \"materials\"], \"preferred_year\": 2024}\n```",
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("scholarly synthesis engine"))
        .respond_with(chat_reply(
            "GNNs now dominate [Graph neural networks for materials property prediction, 2025].",
        ))
        .mount(&server)
        .await;

    let orchestrator = ResearchOrchestrator::from_config(&config_for(&server)).unwrap();
    let request = ResearchRequest {
        query: "graph neural networks for materials".to_string(),
        max_results: 2,
        ..ResearchRequest::default()
    };
    let payload = orchestrator.run(&request).await.unwrap();

    assert_eq!(payload.optimization.method, OptimizerPath::Primary);
    assert_eq!(
        payload.optimized_query.keywords,
        vec!["graph neural network", "materials"]
    );
    assert_eq!(payload.optimized_query.preferred_year, 2024);
    assert!(payload
        .optimization
        .api_queries
        .arxiv
        .starts_with(&format!("{}/api/query?", server.uri())));

    for source in SourceName::ALL {
        assert!(
            is_usable_content(&payload.raw_results[&source]),
            "{source} returned {}",
            payload.raw_results[&source]
        );
    }
    assert_eq!(payload.raw_results[&SourceName::Arxiv].matches("\nURL: ").count(), 2);
    assert_eq!(payload.summary.total, 4);
    assert!(payload
        .synthesis
        .as_deref()
        .unwrap()
        .contains("[Graph neural networks for materials property prediction, 2025]"));
}

#[tokio::test]
async fn test_llm_outage_falls_back_and_reports_unavailable_synthesis() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let orchestrator = ResearchOrchestrator::from_config(&config_for(&server)).unwrap();
    let request = ResearchRequest {
        query: "graph neural networks for materials".to_string(),
        max_results: 2,
        ..ResearchRequest::default()
    };
    let payload = orchestrator.run(&request).await.unwrap();

    assert_eq!(payload.optimization.method, OptimizerPath::Fallback);
    assert_eq!(payload.optimized_query.keywords[0], "graph neural network");
    assert!(payload.summary.total > 0);
    let synthesis = payload.synthesis.unwrap();
    assert!(synthesis.starts_with("Synthesis unavailable"), "got {synthesis}");
    assert!(synthesis.contains("500"));
}
