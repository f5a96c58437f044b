// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! `settld-daemon`: binds the HTTP wire surface built in [`settld_daemon`]
//! to a listening socket.
//!
//! Grounded on `abp-daemon/src/main.rs`'s `clap`-parsed bind address,
//! `tracing_subscriber::fmt` initialization, and `axum::serve` shape.

use anyhow::{Context, Result};
use clap::Parser;
use settld_daemon::{build_app, AppState};
use settld_events::InMemoryStreamLease;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "settld-daemon", version, about = "Settld control-plane daemon")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8090")]
    bind: String,

    /// Server signer's PKCS8 PEM private key, used to mint Settld-Pay
    /// tokens and sign attestations.
    #[arg(long, env = "SETTLD_SERVER_SIGNER_KEY_FILE")]
    server_signer_key_file: std::path::PathBuf,

    /// Path to a JSON-encoded `WalletPolicy` every gate is evaluated
    /// against.
    #[arg(long, env = "SETTLD_WALLET_POLICY_FILE")]
    wallet_policy_file: std::path::PathBuf,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,

    /// Path to a JSON object mapping operator signer key ids to PEM
    /// public keys, recognized for kill-switch dual control (§4.12).
    #[arg(long, env = "SETTLD_OPERATOR_SIGNER_KEYS_FILE")]
    operator_signer_keys_file: Option<std::path::PathBuf>,

    /// Path to a JSON array of operator signer key ids whose
    /// dual-control signing privileges have been revoked.
    #[arg(long, env = "SETTLD_OPERATOR_REVOKED_SIGNER_KEYS_FILE")]
    operator_revoked_signer_keys_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("settld=debug")
    } else {
        EnvFilter::new("settld=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let private_key_pem = std::fs::read_to_string(&args.server_signer_key_file)
        .with_context(|| format!("read server signer key {}", args.server_signer_key_file.display()))?;
    let public_key_pem = settld_crypto::public_key_pem_from_private(&private_key_pem)
        .context("server signer key file is not a valid PKCS8 Ed25519 private key")?;
    let server_signer_key_id = settld_crypto::derive_key_id(&public_key_pem);

    let wallet_policy_json = std::fs::read_to_string(&args.wallet_policy_file)
        .with_context(|| format!("read wallet policy {}", args.wallet_policy_file.display()))?;
    let wallet_policy = serde_json::from_str(&wallet_policy_json)
        .with_context(|| format!("parse wallet policy {}", args.wallet_policy_file.display()))?;

    let operator_signer_keys = match &args.operator_signer_keys_file {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("read operator signer keys {}", path.display()))?;
            serde_json::from_str(&json).with_context(|| format!("parse operator signer keys {}", path.display()))?
        }
        None => BTreeMap::new(),
    };
    let operator_revoked_signer_keys = match &args.operator_revoked_signer_keys_file {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("read revoked operator signer keys {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("parse revoked operator signer keys {}", path.display()))?
        }
        None => BTreeSet::new(),
    };

    let state = Arc::new(AppState {
        gates: RwLock::new(HashMap::new()),
        idempotency_index: RwLock::new(BTreeMap::new()),
        daily_exposure_cents: RwLock::new(HashMap::new()),
        wallet_policy,
        kill_switch_active: AtomicBool::new(false),
        server_signer: settld_crypto::Signer::Local { private_key_pem },
        server_signer_key_id,
        stream_lease: Arc::new(InMemoryStreamLease::new()),
        operator_signer_keys,
        operator_revoked_signer_keys,
    });

    let app = build_app(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "settld-daemon listening");

    axum::serve(listener, app).await.context("serve")
}
