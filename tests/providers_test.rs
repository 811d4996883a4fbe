use rust_research_orchestrator::client::providers::{
    ArxivProvider, OpenAlexProvider, PubMedProvider, SourceProvider,
};
use rust_research_orchestrator::client::{is_usable_content, PaperRecord, NO_PAPERS_FOUND};
use rust_research_orchestrator::config::ResearchSourceConfig;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARXIV_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2501.00001v1</id>
    <published>2025-01-03T00:00:00Z</published>
    <title>Message Passing Networks for Crystal Properties</title>
    <summary>We learn formation energy from crystal graphs.</summary>
    <author><name>Grace Hopper</name></author>
    <link href="http://arxiv.org/abs/2501.00001v1" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2412.00002v1</id>
    <published>2024-12-10T00:00:00Z</published>
    <title>Equivariant Graph Models for Materials</title>
    <summary>Equivariance helps.</summary>
    <author><name>Edsger Dijkstra</name></author>
    <link href="http://arxiv.org/abs/2412.00002v1" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2411.00003v1</id>
    <published>2024-11-01T00:00:00Z</published>
    <title>A Third Paper</title>
    <summary>Filler.</summary>
    <author><name>Barbara Liskov</name></author>
  </entry>
</feed>"#;

const PUBMED_EFETCH: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">39000001</PMID>
      <Article>
        <Journal><JournalIssue><PubDate><Year>2024</Year></PubDate></JournalIssue></Journal>
        <ArticleTitle>Statin therapy and cognitive decline</ArticleTitle>
        <Abstract><AbstractText>A cohort study.</AbstractText></Abstract>
        <AuthorList><Author><LastName>Curie</LastName><ForeName>Marie</ForeName></Author></AuthorList>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

fn arxiv_feed(entries: &[(&str, u32)]) -> String {
    let body: String = entries
        .iter()
        .enumerate()
        .map(|(i, (title, year))| {
            format!(
                r#"<entry>
    <id>http://arxiv.org/abs/{year}.{i:05}v1</id>
    <published>{year}-06-01T00:00:00Z</published>
    <title>{title}</title>
    <summary>Summary.</summary>
    <author><name>Test Author</name></author>
    <link href="http://arxiv.org/abs/{year}.{i:05}v1" rel="alternate" type="text/html"/>
  </entry>"#
            )
        })
        .collect();
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><feed xmlns="http://www.w3.org/2005/Atom">{body}</feed>"#)
}

fn pubmed_articles(entries: &[(&str, &str, u32)]) -> String {
    let body: String = entries
        .iter()
        .map(|(pmid, title, year)| {
            format!(
                r#"<PubmedArticle><MedlineCitation>
    <PMID Version="1">{pmid}</PMID>
    <Article>
      <Journal><JournalIssue><PubDate><Year>{year}</Year></PubDate></JournalIssue></Journal>
      <ArticleTitle>{title}</ArticleTitle>
    </Article>
  </MedlineCitation></PubmedArticle>"#
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><PubmedArticleSet>{body}</PubmedArticleSet>"#)
}

fn openalex_page(entries: &[(&str, u32)]) -> String {
    let results: Vec<serde_json::Value> = entries
        .iter()
        .enumerate()
        .map(|(i, (title, year))| {
            serde_json::json!({
                "id": format!("https://openalex.org/W{year}{i}"),
                "display_name": title,
                "publication_year": year,
                "authorships": []
            })
        })
        .collect();
    serde_json::json!({ "results": results }).to_string()
}

fn titles_and_years(records: &[PaperRecord]) -> Vec<(&str, &str)> {
    records
        .iter()
        .map(|r| (r.title.as_str(), r.year.as_str()))
        .collect()
}

/// Source configuration pointing every provider at the mock server
fn mock_config(server: &MockServer) -> ResearchSourceConfig {
    ResearchSourceConfig {
        max_retries: 1,
        retry_base_delay_ms: 0,
        max_pages: 2,
        arxiv_base_url: format!("{}/api/query", server.uri()),
        pubmed_base_url: format!("{}/entrez/eutils", server.uri()),
        openalex_base_url: format!("{}/works", server.uri()),
        ..ResearchSourceConfig::default()
    }
}

#[tokio::test]
async fn test_arxiv_free_text_search_respects_max_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("search_query", "all:graph materials"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARXIV_FEED))
        .mount(&server)
        .await;

    let provider = ArxivProvider::from_config(&mock_config(&server)).unwrap();
    let records = provider.search("graph materials", 2).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].title, "Message Passing Networks for Crystal Properties");
    assert_eq!(records[0].year, "2025");
    assert_eq!(records[0].authors, "Grace Hopper");
    assert_eq!(records[0].url, "http://arxiv.org/abs/2501.00001v1");
}

#[tokio::test]
async fn test_arxiv_prebuilt_url_is_used_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("search_query", "cat:cs.LG"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARXIV_FEED))
        .mount(&server)
        .await;

    let provider = ArxivProvider::from_config(&mock_config(&server)).unwrap();
    let url = format!(
        "{}/api/query?search_query=cat:cs.LG&start=0&max_results=3",
        server.uri()
    );
    let text = provider.fetch(&url, 3).await;

    assert!(is_usable_content(&text));
    assert_eq!(text.matches("\nURL: ").count(), 3);
    assert!(text.contains("A Third Paper (2024) by Barbara Liskov"));
}

#[tokio::test]
async fn test_arxiv_server_error_becomes_error_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let provider = ArxivProvider::from_config(&mock_config(&server)).unwrap();
    let text = provider.fetch("anything", 3).await;

    assert!(text.starts_with("Error fetching from arXiv: "), "got {text}");
    assert!(!is_usable_content(&text));
}

#[tokio::test]
async fn test_pubmed_esearch_then_efetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esearch.fcgi"))
        .and(query_param("db", "pubmed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"esearchresult": {"count": "1", "idlist": ["39000001"]}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/efetch.fcgi"))
        .and(query_param("id", "39000001"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PUBMED_EFETCH))
        .mount(&server)
        .await;

    let provider = PubMedProvider::from_config(&mock_config(&server)).unwrap();
    let records = provider.search("statin cognition", 3).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "Statin therapy and cognitive decline");
    assert_eq!(records[0].authors, "Marie Curie");
    assert_eq!(records[0].url, "https://pubmed.ncbi.nlm.nih.gov/39000001/");
}

#[tokio::test]
async fn test_pubmed_empty_id_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esearch.fcgi"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"esearchresult": {"count": "0", "idlist": []}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = PubMedProvider::from_config(&mock_config(&server)).unwrap();
    assert_eq!(provider.fetch("nothing matches", 3).await, NO_PAPERS_FOUND);
}

#[tokio::test]
async fn test_openalex_works_and_min_year_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"results": [
                {
                    "id": "https://openalex.org/W1",
                    "display_name": "Graph learning for alloys",
                    "publication_year": 2024,
                    "authorships": [{"author": {"display_name": "Ada Lovelace"}}],
                    "primary_location": {"source": {"url": "https://journal.example/alloys"}},
                    "abstract_inverted_index": {"Alloys": [0], "matter": [1]}
                },
                {
                    "id": "https://openalex.org/W2",
                    "display_name": "An old survey",
                    "publication_year": 2001,
                    "authorships": []
                }
            ]}"#,
        ))
        .mount(&server)
        .await;

    let config = ResearchSourceConfig {
        min_year: Some(2020),
        max_pages: 1,
        ..mock_config(&server)
    };
    let provider = OpenAlexProvider::from_config(&config).unwrap();
    let records = provider.search("graph alloys", 5).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "Graph learning for alloys");
    assert_eq!(records[0].abstract_text, "Alloys matter");
    assert_eq!(records[0].url, "https://journal.example/alloys");
}

#[tokio::test]
async fn test_arxiv_backfills_next_page_when_year_filter_empties_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("start", "0"))
        .and(query_param("max_results", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(arxiv_feed(&[("Ta", 2001), ("Tb", 2002)])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("start", "2"))
        .and(query_param("max_results", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(arxiv_feed(&[("Tc", 2024), ("Td", 2025)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = ResearchSourceConfig {
        min_year: Some(2020),
        ..mock_config(&server)
    };
    let provider = ArxivProvider::from_config(&config).unwrap();
    let records = provider.search("graph materials", 2).await.unwrap();

    assert_eq!(titles_and_years(&records), vec![("Tc", "2024"), ("Td", "2025")]);
}

#[tokio::test]
async fn test_arxiv_stops_at_max_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("start", "0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(arxiv_feed(&[("Ta", 2001), ("Tb", 2002)])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("start", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(arxiv_feed(&[("Tc", 2024), ("Td", 2025)])),
        )
        .expect(0)
        .mount(&server)
        .await;

    let config = ResearchSourceConfig {
        min_year: Some(2020),
        max_pages: 1,
        ..mock_config(&server)
    };
    let provider = ArxivProvider::from_config(&config).unwrap();
    let records = provider.search("graph materials", 2).await.unwrap();

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_arxiv_start_offset_saturates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("start", "4294967295"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(arxiv_feed(&[("Ta", 2001), ("Tb", 2002)])),
        )
        .expect(2)
        .mount(&server)
        .await;

    let config = ResearchSourceConfig {
        min_year: Some(2020),
        ..mock_config(&server)
    };
    let provider = ArxivProvider::from_config(&config).unwrap();
    let url = format!(
        "{}/api/query?search_query=all:graphs&start=4294967295&max_results=2",
        server.uri()
    );
    let records = provider.search(&url, 2).await.unwrap();

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_pubmed_backfills_with_retstart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esearch.fcgi"))
        .and(query_param("retstart", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"esearchresult": {"count": "4", "idlist": ["1003", "1004"]}}"#,
        ))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esearch.fcgi"))
        .and(query_param("retmax", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"esearchresult": {"count": "4", "idlist": ["1001", "1002"]}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/efetch.fcgi"))
        .and(query_param("id", "1001,1002"))
        .respond_with(ResponseTemplate::new(200).set_body_string(pubmed_articles(&[
            ("1001", "Pa", 2001),
            ("1002", "Pb", 2002),
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/efetch.fcgi"))
        .and(query_param("id", "1003,1004"))
        .respond_with(ResponseTemplate::new(200).set_body_string(pubmed_articles(&[
            ("1003", "Pc", 2024),
            ("1004", "Pd", 2025),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let config = ResearchSourceConfig {
        min_year: Some(2020),
        ..mock_config(&server)
    };
    let provider = PubMedProvider::from_config(&config).unwrap();
    let records = provider.search("statin cognition", 2).await.unwrap();

    assert_eq!(titles_and_years(&records), vec![("Pc", "2024"), ("Pd", "2025")]);
}

#[tokio::test]
async fn test_openalex_backfills_with_page_number() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(openalex_page(&[("Wc", 2024), ("Wd", 2025)])),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("per_page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(openalex_page(&[("Wa", 2001), ("Wb", 2002)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = ResearchSourceConfig {
        min_year: Some(2020),
        ..mock_config(&server)
    };
    let provider = OpenAlexProvider::from_config(&config).unwrap();
    let records = provider.search("graph alloys", 2).await.unwrap();

    assert_eq!(titles_and_years(&records), vec![("Wc", "2024"), ("Wd", "2025")]);
}
