// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! `settld-trust`: the trust-directory initialization CLI (§6).
//!
//! Grounded on `abp-cli`'s `Cli`/`Commands` clap-derive shape and its
//! exit-code constants; `cmd_inspect`'s "read in, validate, print or
//! exit nonzero" pattern is the model for this binary's single `init`
//! command.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use settld_error::{ErrorCode, SettldError};
use settld_trust::{init_local, init_remote_only, write_keypairs_file, write_trust_file, KeyProvenance};
use std::path::PathBuf;
use std::process::Command;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;
/// Exit code for usage / argument errors.
const EXIT_USAGE_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "settld-trust", version, about = "Trust directory initialization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a trust directory.
    Init(InitArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModeArg {
    Local,
    RemoteOnly,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Json,
    Text,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SignerAuthArg {
    Bearer,
}

#[derive(Parser, Debug)]
struct InitArgs {
    /// `local` generates keys on disk; `remote-only` resolves public
    /// keys through a remote signer and never holds private key
    /// material.
    #[arg(long, value_enum, default_value = "local")]
    mode: ModeArg,

    /// Output directory for `trust.json` and, in local mode,
    /// `keypairs.json`.
    #[arg(long)]
    out: PathBuf,

    /// Output format for the `TrustInitOutput.v1` summary.
    #[arg(long, value_enum, default_value = "text")]
    format: FormatArg,

    /// Overwrite an existing trust directory.
    #[arg(long)]
    force: bool,

    /// Also generate a time-authority keypair (local mode only).
    #[arg(long)]
    with_time_authority: bool,

    /// Governance root key id to resolve (remote-only mode).
    #[arg(long)]
    governance_root_key_id: Option<String>,

    /// Time authority key id to resolve (remote-only mode).
    #[arg(long)]
    time_authority_key_id: Option<String>,

    /// Remote signer base URL (remote-only mode, HTTP transport).
    #[arg(long)]
    signer_url: Option<String>,

    /// Authentication scheme for `--signer-url`.
    #[arg(long, value_enum)]
    signer_auth: Option<SignerAuthArg>,

    /// Environment variable holding the bearer token.
    #[arg(long)]
    signer_token_env: Option<String>,

    /// File holding the bearer token.
    #[arg(long)]
    signer_token_file: Option<PathBuf>,

    /// Extra header in `"Name: value"` form. Repeatable.
    #[arg(long = "signer-header")]
    signer_headers: Vec<String>,

    /// Remote signer command (remote-only mode, subprocess transport).
    #[arg(long)]
    signer_command: Option<String>,

    /// JSON array of arguments passed to `--signer-command`.
    #[arg(long)]
    signer_args_json: Option<String>,
}

enum CliError {
    Usage(String),
    Runtime(String),
}

impl From<SettldError> for CliError {
    fn from(e: SettldError) -> Self {
        CliError::Runtime(format!("{}: {}", e.code.code(), e.message))
    }
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {}
        Err(CliError::Usage(message)) => {
            eprintln!("usage error: {message}");
            std::process::exit(EXIT_USAGE_ERROR);
        }
        Err(CliError::Runtime(message)) => {
            eprintln!("error: {message}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Init(args) => cmd_init(args),
    }
}

/// The `TrustInitOutput.v1` summary (§6 "CLI (trust-dir tool)").
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrustInitOutput {
    schema_version: &'static str,
    out_dir: String,
    trust_path: String,
    keypairs_path: Option<String>,
    key_ids: KeyIds,
    mode: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyIds {
    governance_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_authority: Option<String>,
}

fn cmd_init(args: InitArgs) -> Result<(), CliError> {
    let trust_path = args.out.join("trust.json");
    let keypairs_path = args.out.join("keypairs.json");

    if !args.force && (trust_path.exists() || keypairs_path.exists()) {
        return Err(CliError::Runtime(format!(
            "{} already contains a trust directory (use --force to overwrite)",
            args.out.display()
        )));
    }

    std::fs::create_dir_all(&args.out)
        .map_err(|e| CliError::Runtime(format!("failed to create {}: {e}", args.out.display())))?;

    let output = match args.mode {
        ModeArg::Local => cmd_init_local(&args, &trust_path, &keypairs_path)?,
        ModeArg::RemoteOnly => cmd_init_remote_only(&args, &trust_path)?,
    };

    match args.format {
        FormatArg::Json => {
            let json = serde_json::to_string_pretty(&output)
                .map_err(|e| CliError::Runtime(format!("failed to serialize output: {e}")))?;
            println!("{json}");
        }
        FormatArg::Text => {
            println!("mode:             {}", output.mode);
            println!("outDir:           {}", output.out_dir);
            println!("trustPath:        {}", output.trust_path);
            println!(
                "keypairsPath:     {}",
                output.keypairs_path.as_deref().unwrap_or("<none>")
            );
            println!("governanceRoot:   {}", output.key_ids.governance_root);
            if let Some(ta) = &output.key_ids.time_authority {
                println!("timeAuthority:    {ta}");
            }
        }
    }

    Ok(())
}

fn cmd_init_local(
    args: &InitArgs,
    trust_path: &std::path::Path,
    keypairs_path: &std::path::Path,
) -> Result<TrustInitOutput, CliError> {
    let init = init_local(args.with_time_authority)?;
    write_trust_file(trust_path, &init.trust)?;
    write_keypairs_file(keypairs_path, &init.keypairs)?;

    Ok(TrustInitOutput {
        schema_version: "TrustInitOutput.v1",
        out_dir: args.out.display().to_string(),
        trust_path: trust_path.display().to_string(),
        keypairs_path: Some(keypairs_path.display().to_string()),
        key_ids: KeyIds {
            governance_root: init.governance_root_key_id,
            server: None,
            time_authority: init.time_authority_key_id,
        },
        mode: "local",
    })
}

fn cmd_init_remote_only(
    args: &InitArgs,
    trust_path: &std::path::Path,
) -> Result<TrustInitOutput, CliError> {
    let governance_root_key_id = args
        .governance_root_key_id
        .clone()
        .ok_or_else(|| CliError::Usage("--governance-root-key-id is required in remote-only mode".into()))?;

    let transport = resolve_transport(args)?;

    let trust = init_remote_only(
        &governance_root_key_id,
        args.time_authority_key_id.as_deref(),
        transport.provenance(),
        |key_id| transport.resolve(key_id),
    )?;

    write_trust_file(trust_path, &trust)?;

    Ok(TrustInitOutput {
        schema_version: "TrustInitOutput.v1",
        out_dir: args.out.display().to_string(),
        trust_path: trust_path.display().to_string(),
        keypairs_path: None,
        key_ids: KeyIds {
            governance_root: governance_root_key_id,
            server: None,
            time_authority: args.time_authority_key_id.clone(),
        },
        mode: "remote-only",
    })
}

enum SignerTransport {
    Url {
        base_url: String,
        headers: Vec<(String, String)>,
    },
    Command {
        command: String,
        args: Vec<String>,
    },
}

impl SignerTransport {
    fn provenance(&self) -> KeyProvenance {
        match self {
            SignerTransport::Url { base_url, .. } => KeyProvenance::RemoteUrl { url: base_url.clone() },
            SignerTransport::Command { command, .. } => {
                KeyProvenance::RemoteCommand { command: command.clone() }
            }
        }
    }

    fn resolve(&self, key_id: &str) -> Result<String, SettldError> {
        match self {
            SignerTransport::Url { base_url, headers } => http_get(base_url, key_id, headers),
            SignerTransport::Command { command, args } => {
                let mut full_args = args.clone();
                full_args.push(key_id.to_string());
                let output = Command::new(command).args(&full_args).output().map_err(|e| {
                    SettldError::new(
                        ErrorCode::SignerProviderInvalidResponse,
                        format!("failed to spawn signer command {command}: {e}"),
                    )
                })?;
                if !output.status.success() {
                    return Err(SettldError::new(
                        ErrorCode::SignerProviderInvalidResponse,
                        format!("signer command {command} exited with {}", output.status),
                    ));
                }
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
        }
    }
}

fn resolve_transport(args: &InitArgs) -> Result<SignerTransport, CliError> {
    let has_url = args.signer_url.is_some();
    let has_command = args.signer_command.is_some();

    if has_url == has_command {
        return Err(CliError::Usage(
            "exactly one of --signer-url or --signer-command must be set in remote-only mode".into(),
        ));
    }

    if let Some(base_url) = &args.signer_url {
        let mut headers = Vec::new();
        if let Some(SignerAuthArg::Bearer) = args.signer_auth {
            let token = resolve_bearer_token(args)?;
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        for raw in &args.signer_headers {
            let (name, value) = raw.split_once(':').ok_or_else(|| {
                CliError::Usage(format!("--signer-header must be \"Name: value\", got {raw:?}"))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
        return Ok(SignerTransport::Url { base_url: base_url.clone(), headers });
    }

    let command = args.signer_command.clone().unwrap();
    let args_json = args
        .signer_args_json
        .clone()
        .ok_or_else(|| CliError::Usage("--signer-command requires --signer-args-json".into()))?;
    let parsed: Vec<String> = serde_json::from_str(&args_json)
        .map_err(|e| CliError::Usage(format!("--signer-args-json must be a JSON array of strings: {e}")))?;
    Ok(SignerTransport::Command { command, args: parsed })
}

fn resolve_bearer_token(args: &InitArgs) -> Result<String, CliError> {
    if let Some(var) = &args.signer_token_env {
        return std::env::var(var)
            .map_err(|_| CliError::Usage(format!("environment variable {var} is not set")));
    }
    if let Some(path) = &args.signer_token_file {
        return std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| CliError::Runtime(format!("failed to read {}: {e}", path.display())));
    }
    Err(CliError::Usage(
        "--signer-auth bearer requires --signer-token-env or --signer-token-file".into(),
    ))
}

/// Resolve one public key from a remote signer's `getPublicKey` endpoint
/// over HTTP, reusing the teacher's blocking-client shape for one-shot
/// CLI calls rather than pulling the async runtime into a trust-dir tool.
fn http_get(base_url: &str, key_id: &str, headers: &[(String, String)]) -> Result<String, SettldError> {
    let client = reqwest::blocking::Client::new();
    let mut request = client.get(base_url).query(&[("keyId", key_id)]);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().map_err(|e| {
        SettldError::new(
            ErrorCode::SignerProviderInvalidResponse,
            format!("request to signer at {base_url} failed: {e}"),
        )
    })?;

    if !response.status().is_success() {
        return Err(SettldError::new(
            ErrorCode::SignerProviderInvalidResponse,
            format!("signer returned non-success status {}", response.status()),
        ));
    }

    let body = response.text().map_err(|e| {
        SettldError::new(ErrorCode::SignerProviderInvalidResponse, format!("failed to read response body: {e}"))
    })?;
    Ok(body.trim().to_string())
}
