#![allow(dead_code)]

use quota_ingest::cache::TtlCache;
use quota_ingest::client::{CredentialProvider, Fetcher, LimitedClient};
use quota_ingest::ingest::{IngestContext, KnownUsers, MemoryStore, StatsReporter};
use quota_ingest::resilience::remote_gate::RemoteGateConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN: &str = "test-token";

/// A client pointed at `base` with a generous local rate and a pre-issued token.
pub fn fetcher(base: &str) -> Fetcher {
    fetcher_with_gate(base, RemoteGateConfig::default())
}

pub fn fetcher_with_gate(base: &str, gate: RemoteGateConfig) -> Fetcher {
    let client = Arc::new(
        LimitedClient::builder()
            .rate_limit_rps(1000.0)
            .remote_gate(gate)
            .build()
            .unwrap(),
    );
    let credentials = Arc::new(CredentialProvider::with_static_token(
        client.http().clone(),
        TOKEN,
    ));
    Fetcher::new(client, credentials, base, "20220705").unwrap()
}

pub fn context(base: &str, store: Arc<MemoryStore>, dump_dir: &Path) -> Arc<IngestContext> {
    Arc::new(IngestContext {
        fetcher: fetcher(base),
        store,
        known: Arc::new(KnownUsers::new()),
        seen_scores: Arc::new(TtlCache::new(Duration::from_secs(24 * 60 * 60))),
        reporter: Arc::new(StatsReporter::new()),
        include_failed: false,
        dump_dir: dump_dir.to_path_buf(),
    })
}
