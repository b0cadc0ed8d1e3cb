use async_trait::async_trait;
use land_scout::artifacts::{ArtifactWriter, AttemptLog};
use land_scout::config::RunConfig;
use land_scout::delivery::{DeliveryConfig, DeliveryService, OutboundMessage, Transport};
use land_scout::orchestrator::{ProxyRotation, RetryPolicy};
use land_scout::pipeline::{ParserFactory, Pipeline, RunStatus};
use land_scout::scrapers::{build_parser, FetchedPage, PacingConfig, PageFetcher, SourceParser};
use land_scout::{Area, Currency, DedupStore, DeliveryError, ErrorKind, Listing, ParseError, Price, Source};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ML_SEARCH_URL: &str = "https://listado.mercadolibre.com.uy/inmuebles/terrenos/venta";
const GALLITO_SEARCH_URL: &str = "https://www.gallito.com.uy/inmuebles/terrenos/venta?pag=1";
const GALLITO_DETAIL_URL: &str = "https://www.gallito.com.uy/chacra-en-minas-con-arroyo-inmuebles-23456789";

fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("missing fixture {}: {e}", path.display()))
}

/// Serves fixture HTML by URL; unknown URLs time out
#[derive(Clone)]
struct FixtureFetcher {
    pages: Arc<HashMap<String, String>>,
}

#[async_trait]
impl PageFetcher for FixtureFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ParseError> {
        match self.pages.get(url) {
            Some(body) => Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                body: body.clone(),
            }),
            None => Err(ParseError::Transient {
                url: url.to_string(),
                reason: "request timed out".to_string(),
            }),
        }
    }
}

/// Builds real parsers over fixture pages. Requests through `blocked_proxy`
/// get a captcha page instead.
struct FixtureParsers {
    pages: Arc<HashMap<String, String>>,
    blocked_proxy: Option<String>,
    opened_with: Mutex<Vec<Option<String>>>,
}

impl FixtureParsers {
    fn new(pages: &[(&str, String)]) -> Self {
        Self {
            pages: Arc::new(pages.iter().map(|(url, body)| (url.to_string(), body.clone())).collect()),
            blocked_proxy: None,
            opened_with: Mutex::new(Vec::new()),
        }
    }
}

impl ParserFactory for FixtureParsers {
    fn open(&self, source: Source, proxy: Option<&str>) -> Result<Box<dyn SourceParser>, ParseError> {
        self.opened_with.lock().unwrap().push(proxy.map(str::to_string));

        let pages = if proxy.is_some() && proxy == self.blocked_proxy.as_deref() {
            let captcha = fixture("captcha.html");
            Arc::new(self.pages.keys().map(|url| (url.clone(), captcha.clone())).collect())
        } else {
            Arc::clone(&self.pages)
        };
        Ok(build_parser(source, Arc::new(FixtureFetcher { pages }), PacingConfig::none()))
    }
}

/// Records delivered listing ids; fails the ones listed in `fail_ids`
#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    fail_ids: Vec<String>,
}

impl RecordingTransport {
    fn delivered_ids(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.listing_id.clone()).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        if self.fail_ids.contains(&message.listing_id) {
            return Err(DeliveryError::Rejected("chat not found".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn delivery(transport: &RecordingTransport) -> Arc<DeliveryService> {
    Arc::new(DeliveryService::new(
        Box::new(transport.clone()),
        None,
        DeliveryConfig {
            min_interval: Duration::ZERO,
            max_images: 5,
        },
    ))
}

fn config(data_dir: &Path, source: Source) -> RunConfig {
    RunConfig {
        sources: vec![source],
        pacing: PacingConfig::none(),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        },
        data_dir: data_dir.to_path_buf(),
        ..RunConfig::default()
    }
}

fn posted(source: Source, id: &str) -> Listing {
    Listing::new(
        id.to_string(),
        source,
        "Previously posted".into(),
        Price {
            amount: Decimal::from(1),
            currency: Currency::Usd,
        },
        Area::square_meters(Decimal::from(1)),
        String::new(),
        format!("https://example.com/{id}"),
        vec![],
        BTreeMap::new(),
    )
}

fn attempt_logs(data_dir: &Path) -> Vec<AttemptLog> {
    let dir = ArtifactWriter::new(data_dir).logs_dir().to_path_buf();
    let mut logs: Vec<AttemptLog> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| serde_json::from_slice(&std::fs::read(entry.unwrap().path()).unwrap()).unwrap())
        .collect();
    logs.sort_by_key(|l| l.attempt);
    logs
}

#[tokio::test]
async fn skips_listings_posted_in_earlier_runs() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), Source::MercadoLibre);
    let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
    store.record_posted(&posted(Source::MercadoLibre, "MLU1001"));
    store.record_posted(&posted(Source::MercadoLibre, "MLU1004"));

    let transport = RecordingTransport::default();
    let parsers = Arc::new(FixtureParsers::new(&[(ML_SEARCH_URL, fixture("mercadolibre_search.html"))]));
    let pipeline = Pipeline::new(cfg, parsers, Arc::clone(&store), Some(delivery(&transport)), CancellationToken::new());

    let report = pipeline.run_source(Source::MercadoLibre).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.fetched, 5);
    assert_eq!(report.new, 3);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.skipped_duplicate, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(transport.delivered_ids(), vec!["MLU1002", "MLU1003", "MLU1005"]);
    for id in ["MLU1001", "MLU1002", "MLU1003", "MLU1004", "MLU1005"] {
        assert!(store.contains(id, Source::MercadoLibre), "{id} should be marked posted");
    }
}

#[tokio::test]
async fn second_run_delivers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let transport = RecordingTransport::default();

    for _ in 0..2 {
        let cfg = config(dir.path(), Source::MercadoLibre);
        let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
        let parsers = Arc::new(FixtureParsers::new(&[(ML_SEARCH_URL, fixture("mercadolibre_search.html"))]));
        let pipeline = Pipeline::new(cfg, parsers, store, Some(delivery(&transport)), CancellationToken::new());
        pipeline.run_source(Source::MercadoLibre).await.unwrap();
    }

    assert_eq!(transport.delivered_ids().len(), 5);
}

#[tokio::test]
async fn missing_price_drops_one_listing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), Source::MercadoLibre);
    let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
    let transport = RecordingTransport::default();
    let parsers = Arc::new(FixtureParsers::new(&[(
        ML_SEARCH_URL,
        fixture("mercadolibre_search_missing_price.html"),
    )]));
    let pipeline = Pipeline::new(cfg, parsers, Arc::clone(&store), Some(delivery(&transport)), CancellationToken::new());

    let report = pipeline.run_source(Source::MercadoLibre).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.fetched, 5);
    assert_eq!(report.normalized, 4);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.delivered, 4);
    assert!(!store.contains("MLU1003", Source::MercadoLibre));

    let logs = attempt_logs(dir.path());
    assert_eq!(logs.len(), 1);
    let normalization: Vec<_> = logs[0]
        .entries
        .iter()
        .filter(|e| e.kind == ErrorKind::Normalization)
        .collect();
    assert_eq!(normalization.len(), 1);
    assert_eq!(normalization[0].listing_id.as_deref(), Some("MLU1003"));
}

#[tokio::test]
async fn failed_delivery_stays_eligible() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), Source::MercadoLibre);
    let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
    let transport = RecordingTransport {
        fail_ids: vec!["MLU1002".into()],
        ..Default::default()
    };
    let parsers = Arc::new(FixtureParsers::new(&[(ML_SEARCH_URL, fixture("mercadolibre_search.html"))]));
    let pipeline = Pipeline::new(cfg, parsers, Arc::clone(&store), Some(delivery(&transport)), CancellationToken::new());

    let report = pipeline.run_source(Source::MercadoLibre).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.delivered, 4);
    assert_eq!(report.failed, 1);
    assert!(!store.contains("MLU1002", Source::MercadoLibre));
    let record = store
        .records()
        .into_iter()
        .find(|r| r.listing_id == "MLU1002")
        .expect("seen listing is recorded");
    assert!(!record.posted);

    let logs = attempt_logs(dir.path());
    assert!(logs[0]
        .entries
        .iter()
        .any(|e| e.kind == ErrorKind::Delivery && e.listing_id.as_deref() == Some("MLU1002")));
}

#[tokio::test]
async fn dry_run_marks_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        dry_run: true,
        ..config(dir.path(), Source::MercadoLibre)
    };
    let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
    let parsers = Arc::new(FixtureParsers::new(&[(ML_SEARCH_URL, fixture("mercadolibre_search.html"))]));
    let pipeline = Pipeline::new(cfg, parsers, Arc::clone(&store), None, CancellationToken::new());

    let report = pipeline.run_source(Source::MercadoLibre).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.new, 5);
    assert_eq!(report.delivered, 0);
    assert!(!store.contains("MLU1001", Source::MercadoLibre));
}

#[tokio::test]
async fn blocked_attempt_rotates_to_next_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        proxies: ProxyRotation::new(vec!["http://p0:8080".into(), "http://p1:8080".into()], true),
        ..config(dir.path(), Source::MercadoLibre)
    };
    let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
    let transport = RecordingTransport::default();
    let parsers = Arc::new(FixtureParsers {
        blocked_proxy: Some("http://p0:8080".into()),
        ..FixtureParsers::new(&[(ML_SEARCH_URL, fixture("mercadolibre_search.html"))])
    });
    let pipeline = Pipeline::new(
        cfg,
        Arc::clone(&parsers) as Arc<dyn ParserFactory>,
        store,
        Some(delivery(&transport)),
        CancellationToken::new(),
    );

    let report = pipeline.run_source(Source::MercadoLibre).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.attempts, 2);
    assert_eq!(report.delivered, 5);
    assert_eq!(
        *parsers.opened_with.lock().unwrap(),
        vec![Some("http://p0:8080".to_string()), Some("http://p1:8080".to_string())]
    );

    let logs = attempt_logs(dir.path());
    assert_eq!(logs.len(), 2);
    assert!(logs[0].entries.iter().any(|e| e.kind == ErrorKind::Blocked));
    assert_eq!(logs[1].proxy.as_deref(), Some("http://p1:8080"));
}

#[tokio::test]
async fn always_blocked_source_is_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), Source::MercadoLibre);
    let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
    let transport = RecordingTransport::default();
    let parsers = Arc::new(FixtureParsers::new(&[(ML_SEARCH_URL, fixture("captcha.html"))]));
    let pipeline = Pipeline::new(cfg, parsers, store, Some(delivery(&transport)), CancellationToken::new());

    let report = pipeline.run_source(Source::MercadoLibre).await.unwrap();

    assert_eq!(report.status, RunStatus::Exhausted);
    assert_eq!(report.attempts, 3);
    assert!(report.error.unwrap().contains("g-recaptcha"));
    assert!(transport.delivered_ids().is_empty());
    assert_eq!(attempt_logs(dir.path()).len(), 3);
}

#[tokio::test]
async fn gallito_listings_are_completed_from_detail_pages() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), Source::Gallito);
    let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
    let transport = RecordingTransport::default();
    let parsers = Arc::new(FixtureParsers::new(&[
        (GALLITO_SEARCH_URL, fixture("gallito_search.html")),
        (GALLITO_DETAIL_URL, fixture("gallito_detail.html")),
    ]));
    let pipeline = Pipeline::new(cfg, parsers, Arc::clone(&store), Some(delivery(&transport)), CancellationToken::new());

    let report = pipeline.run_source(Source::Gallito).await.unwrap();

    // The rental is blacklisted; the second lot's detail page is unreachable
    // so it never gets an area
    assert_eq!(report.fetched, 2);
    assert_eq!(report.normalized, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.delivered, 1);

    let sent = transport.sent.lock().unwrap();
    let message = &sent[0];
    assert_eq!(message.listing_id, "23456789");
    assert!(message.text.contains("50\\.000 m² \\(5 ha\\)"));
    assert!(message.text.contains("\\#Lavalleja"));
    assert_eq!(message.photos.len(), 4);
    assert_eq!(message.photos[0], "https://img.gallito.com.uy/23456789_1.jpg");
}

#[tokio::test]
async fn run_all_reports_every_source() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        sources: vec![Source::MercadoLibre, Source::InfoCasas],
        retry: RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter: false,
        },
        ..config(dir.path(), Source::MercadoLibre)
    };
    let store = Arc::new(DedupStore::load(cfg.store_path()).unwrap());
    let transport = RecordingTransport::default();
    // No InfoCasas pages: that source times out without affecting the other
    let parsers = Arc::new(FixtureParsers::new(&[(ML_SEARCH_URL, fixture("mercadolibre_search.html"))]));
    let pipeline = Pipeline::new(cfg, parsers, store, Some(delivery(&transport)), CancellationToken::new());

    let results = pipeline.run_all().await;

    assert_eq!(results.len(), 2);
    let ml = results[0].1.as_ref().unwrap();
    let ic = results[1].1.as_ref().unwrap();
    assert_eq!(results[0].0, Source::MercadoLibre);
    assert_eq!(ml.delivered, 5);
    assert_eq!(ic.status, RunStatus::Exhausted);
}

/// Delivers, then fires the run's cancel token on its first send
struct CancellingTransport {
    inner: RecordingTransport,
    cancel: CancellationToken,
}

#[async_trait]
impl Transport for CancellingTransport {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.inner.send(message).await?;
        self.cancel.cancel();
        Ok(())
    }
}

#[tokio::test]
async fn cancel_mid_delivery_marks_only_confirmed_listings() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), Source::MercadoLibre);
    let store_path = cfg.store_path();
    let store = Arc::new(DedupStore::load(&store_path).unwrap());
    let cancel = CancellationToken::new();
    let recorder = RecordingTransport::default();
    let delivery = Arc::new(
        DeliveryService::new(
            Box::new(CancellingTransport {
                inner: recorder.clone(),
                cancel: cancel.clone(),
            }),
            None,
            DeliveryConfig {
                min_interval: Duration::ZERO,
                max_images: 5,
            },
        )
        .with_cancel(cancel.clone()),
    );
    let parsers = Arc::new(FixtureParsers::new(&[(ML_SEARCH_URL, fixture("mercadolibre_search.html"))]));
    let pipeline = Pipeline::new(cfg, parsers, Arc::clone(&store), Some(delivery), cancel);

    let report = pipeline.run_source(Source::MercadoLibre).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.delivered, 1);
    assert_eq!(recorder.delivered_ids(), vec!["MLU1001"]);
    drop(pipeline);
    drop(store);

    let reloaded = DedupStore::load(&store_path).unwrap();
    let posted: Vec<String> = reloaded
        .records()
        .into_iter()
        .filter(|r| r.posted)
        .map(|r| r.listing_id)
        .collect();
    assert_eq!(posted, vec!["MLU1001"]);
}
