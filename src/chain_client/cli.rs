//! `ChainClient` backed by the destination chain's CLI binary and LCD
//!
//! Transactions are passed to the binary as files in a work directory. The
//! keyring password, when the backend needs one, is written to the child's
//! stdin and never appears in arguments or logs.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{burn_tx_hash, BroadcastResult, ChainClient};
use crate::config::CosmosConfig;
use crate::types::{Signature, UnsignedTx};

/// Account info from the LCD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub sequence: u64,
    pub account_number: u64,
}

#[derive(Debug, Deserialize)]
struct BroadcastOutput {
    #[serde(default)]
    txhash: Option<String>,
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    raw_log: Option<String>,
}

pub struct CliChainClient {
    binary: String,
    chain_id: String,
    lcd_url: String,
    multisig_address: String,
    /// Keyring key used for signing, or the multisig key when combining
    key_name: String,
    keyring_backend: String,
    keyring_password: String,
    work_dir: PathBuf,
    http: Client,
}

impl CliChainClient {
    pub fn new(config: &CosmosConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to create HTTP client")?;

        let key_name = config
            .operator_user
            .clone()
            .unwrap_or_else(|| config.multisig_address.clone());

        Ok(Self {
            binary: config.client_binary.clone(),
            chain_id: config.chain_id.clone(),
            lcd_url: config.lcd_url.trim_end_matches('/').to_string(),
            multisig_address: config.multisig_address.clone(),
            key_name,
            keyring_backend: config.keyring_backend.clone(),
            keyring_password: config.keyring_password.clone(),
            work_dir: config.tmp_path.clone(),
            http,
        })
    }

    /// Create the work directory if it does not exist
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .wrap_err_with(|| format!("Failed to create work dir {}", self.work_dir.display()))
    }

    /// Query sequence and account number of the multisig account
    pub async fn get_account_info(&self) -> Result<AccountInfo> {
        let url = format!(
            "{}/cosmos/auth/v1beta1/accounts/{}",
            self.lcd_url, self.multisig_address
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .wrap_err("Failed to query account info")?;

        if !response.status().is_success() {
            return Err(eyre!(
                "Account query failed: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        let data: serde_json::Value = response.json().await?;
        parse_account_info(&data)
    }

    fn needs_password(&self) -> bool {
        self.keyring_backend != "test"
    }

    fn keyring_args(&self) -> Vec<String> {
        vec!["--keyring-backend".to_string(), self.keyring_backend.clone()]
    }

    fn work_file(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Run the chain binary and return stdout. Non-zero exit is an error
    /// carrying stderr.
    async fn run(&self, args: &[String], with_password: bool) -> Result<String> {
        debug!(binary = %self.binary, subcommand = %args.iter().take(3).cloned().collect::<Vec<_>>().join(" "), "Running chain CLI");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .wrap_err_with(|| format!("Failed to spawn {}", self.binary))?;

        if let Some(mut stdin) = child.stdin.take() {
            if with_password && self.needs_password() {
                // Some CLIs prompt twice (passphrase and confirmation)
                let input = format!("{0}\n{0}\n", self.keyring_password);
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .wrap_err("Failed to write keyring password")?;
            }
            // Dropping stdin closes it so the child never blocks on a prompt
        }

        let output = child
            .wait_with_output()
            .await
            .wrap_err_with(|| format!("Failed to wait for {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!(
                "{} {} failed ({}): {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        tokio::fs::write(path, body)
            .await
            .wrap_err_with(|| format!("Failed to write {}", path.display()))
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("Failed to read {}", path.display()))
    }
}

#[async_trait]
impl ChainClient for CliChainClient {
    async fn sequence_number(&self) -> Result<u64> {
        Ok(self.get_account_info().await?.sequence)
    }

    async fn get_account_number(&self) -> Result<u64> {
        Ok(self.get_account_info().await?.account_number)
    }

    async fn generate_token_swap(
        &self,
        src_tx_hash: &str,
        src_sender: &str,
        amount: u128,
        dest_address: &str,
    ) -> Result<UnsignedTx> {
        let mut args: Vec<String> = vec![
            "tx".into(),
            "tokenswap".into(),
            "create".into(),
            src_tx_hash.into(),
            src_sender.into(),
            amount.to_string(),
            dest_address.into(),
            "--from".into(),
            self.multisig_address.clone(),
            format!("--chain-id={}", self.chain_id),
            "--generate-only".into(),
        ];
        args.extend(self.keyring_args());

        let stdout = self.run(&args, true).await?;
        let value: serde_json::Value = serde_json::from_str(stdout.trim())
            .wrap_err_with(|| format!("Chain CLI returned invalid unsigned tx for {}", src_tx_hash))?;

        let unsigned_tx = UnsignedTx(value);
        if unsigned_tx.is_empty() {
            return Err(eyre!("Chain CLI returned an empty unsigned tx for {}", src_tx_hash));
        }
        Ok(unsigned_tx)
    }

    async fn sign_tx(
        &self,
        unsigned_tx: &UnsignedTx,
        sequence: u64,
        account_number: u64,
    ) -> Result<String> {
        let tag = burn_tx_hash(unsigned_tx).unwrap_or("unknown");
        let unsigned_file = self.work_file(&format!("{}_unsigned_{}.json", self.key_name, tag));
        let signed_file = self.work_file(&format!("{}_sig_{}.json", self.key_name, tag));
        self.write_json(&unsigned_file, &unsigned_tx.0).await?;

        let mut args: Vec<String> = vec![
            "tx".into(),
            "sign".into(),
            unsigned_file.display().to_string(),
            "--offline".into(),
            "--account-number".into(),
            account_number.to_string(),
            "--sequence".into(),
            sequence.to_string(),
            "--multisig".into(),
            self.multisig_address.clone(),
            format!("--chain-id={}", self.chain_id),
            format!("--from={}", self.key_name),
            "--output-document".into(),
            signed_file.display().to_string(),
            "--yes".into(),
        ];
        args.extend(self.keyring_args());

        self.run(&args, true).await?;
        let signature = self.read_file(&signed_file).await?;
        if signature.trim().is_empty() {
            return Err(eyre!("Chain CLI produced an empty signature for {}", tag));
        }
        Ok(signature)
    }

    async fn broadcast_token_swap(
        &self,
        signatures: &[Signature],
        unsigned_tx: &UnsignedTx,
        sequence: u64,
        account_number: u64,
    ) -> Result<BroadcastResult> {
        let tag = burn_tx_hash(unsigned_tx).unwrap_or("unknown");
        let unsigned_file = self.work_file(&format!("{}_{}_unsigned.json", self.key_name, tag));
        let signed_file = self.work_file(&format!("{}_{}_signed.json", self.key_name, tag));
        self.write_json(&unsigned_file, &unsigned_tx.0).await?;

        let mut sig_files = Vec::with_capacity(signatures.len());
        for (i, sig) in signatures.iter().enumerate() {
            let path = self.work_file(&format!(
                "{}_signed_{}_{}_{}.json",
                self.key_name, sig.operator, sig.transaction_hash, i
            ));
            tokio::fs::write(&path, sig.signature.as_bytes())
                .await
                .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
            sig_files.push(path.display().to_string());
        }

        let mut args: Vec<String> = vec![
            "tx".into(),
            "multisign".into(),
            "--offline".into(),
            "--account-number".into(),
            account_number.to_string(),
            "--sequence".into(),
            sequence.to_string(),
            unsigned_file.display().to_string(),
            self.key_name.clone(),
            format!("--chain-id={}", self.chain_id),
            "--yes".into(),
        ];
        args.extend(sig_files);
        args.extend(self.keyring_args());

        let multisigned = self.run(&args, false).await?;
        tokio::fs::write(&signed_file, multisigned.as_bytes())
            .await
            .wrap_err_with(|| format!("Failed to write {}", signed_file.display()))?;

        let args: Vec<String> = vec![
            "tx".into(),
            "broadcast".into(),
            signed_file.display().to_string(),
            "-b".into(),
            "sync".into(),
            "--output".into(),
            "json".into(),
        ];
        let stdout = self.run(&args, false).await?;
        let result = parse_broadcast_output(&stdout)?;
        info!(tx_hash = %tag, mint_tx_hash = ?result.txhash, "Broadcast submitted");
        Ok(result)
    }

    async fn is_swap_done(&self, src_tx_hash: &str) -> Result<bool> {
        let args: Vec<String> = vec![
            "query".into(),
            "tokenswap".into(),
            "get".into(),
            src_tx_hash.into(),
            format!("--chain-id={}", self.chain_id),
            "--output".into(),
            "json".into(),
        ];

        match self.run(&args, false).await {
            Ok(stdout) => parse_swap_done(&stdout),
            Err(e) if is_not_found(&e.to_string()) => {
                debug!(tx_hash = %src_tx_hash, "Swap not known on chain yet");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Extract sequence and account number from an LCD account response.
/// Vesting and module accounts nest them under `base_account`.
fn parse_account_info(data: &serde_json::Value) -> Result<AccountInfo> {
    let account = data
        .get("account")
        .ok_or_else(|| eyre!("Missing 'account' field in response"))?;

    let field = |name: &str| -> Result<u64> {
        let value = account
            .get(name)
            .or_else(|| account.get("base_account").and_then(|b| b.get(name)));
        match value {
            // LCD encodes uint64 as strings
            Some(serde_json::Value::String(s)) => s
                .parse()
                .map_err(|e| eyre!("Invalid {} '{}': {}", name, s, e)),
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| eyre!("Invalid {} {}", name, n)),
            // Fresh accounts omit zero values
            None | Some(serde_json::Value::Null) => Ok(0),
            Some(other) => Err(eyre!("Unexpected {} value: {}", name, other)),
        }
    };

    Ok(AccountInfo {
        sequence: field("sequence")?,
        account_number: field("account_number")?,
    })
}

fn parse_broadcast_output(stdout: &str) -> Result<BroadcastResult> {
    let output: BroadcastOutput = serde_json::from_str(stdout.trim())
        .wrap_err("Chain CLI returned invalid broadcast output")?;

    match output.code {
        Some(code) if code != 0 => {
            warn!(
                code,
                raw_log = %output.raw_log.unwrap_or_default(),
                "Broadcast rejected by chain"
            );
            Ok(BroadcastResult { txhash: None })
        }
        _ => Ok(BroadcastResult {
            txhash: output.txhash.filter(|h| !h.is_empty()),
        }),
    }
}

fn parse_swap_done(stdout: &str) -> Result<bool> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }
    let value: serde_json::Value =
        serde_json::from_str(trimmed).wrap_err("Chain CLI returned invalid tokenswap")?;
    Ok(value
        .get("done")
        .or_else(|| value.get("swap").and_then(|s| s.get("done")))
        .and_then(|d| d.as_bool())
        .unwrap_or(false))
}

fn is_not_found(error: &str) -> bool {
    let lower = error.to_lowercase();
    lower.contains("not found") || lower.contains("unknown token swap") || lower.contains("does not exist")
}
