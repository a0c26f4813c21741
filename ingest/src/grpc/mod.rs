//! Yellowstone gRPC transport: connects, subscribes to the curated program
//! set, and exposes a plain `UpdateOneof` stream plus a periodic-ping
//! keepalive. Transaction decoding lives in [`decode`].

pub mod decode;

use anyhow::{Context, Result};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use yellowstone_grpc_client::GeyserGrpcClient;
use yellowstone_grpc_proto::geyser::{
    subscribe_update::UpdateOneof, CommitmentLevel, SubscribeRequest, SubscribeRequestFilterTransactions,
    SubscribeRequestPing,
};

use crate::config::GrpcConfig;

/// Thin reconnect-with-backoff wrapper around the raw Yellowstone client.
/// `max_retries` bounds the initial connect attempt only; once subscribed,
/// stream errors are surfaced to the caller, which reconnects by calling
/// `connect_and_subscribe` again (see `main`'s outer loop).
pub struct YellowstoneClient {
    endpoint: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl YellowstoneClient {
    pub fn new(config: &GrpcConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    /// Connects and subscribes, retrying the initial connect up to
    /// `max_retries` times. Returns the decoded update stream plus a sender
    /// the caller can use to push follow-up requests (pings) onto the same
    /// bidirectional stream; a background task forwards sends into the
    /// underlying gRPC sink so callers never touch the opaque `Sink` type.
    pub async fn connect_and_subscribe(
        &self,
        request: SubscribeRequest,
    ) -> Result<(mpsc::UnboundedSender<SubscribeRequest>, impl Stream<Item = Result<UpdateOneof>>)> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let client_builder = GeyserGrpcClient::build_from_shared(self.endpoint.clone())
                .context("failed to build gRPC client")?;

            match client_builder.connect().await {
                Ok(mut client) => {
                    info!(endpoint = %self.endpoint, "connected to chain-gateway stream");
                    let (sink, stream) = client
                        .subscribe_with_request(Some(request.clone()))
                        .await
                        .context("failed to create subscription")?;
                    info!("subscription established");

                    let (tx, rx) = mpsc::unbounded_channel::<SubscribeRequest>();
                    tokio::spawn(Self::forward_requests(sink, rx));

                    return Ok((tx, Self::create_stream(stream)));
                }
                Err(e) => {
                    if attempts >= self.max_retries {
                        return Err(anyhow::anyhow!(
                            "failed to connect after {} attempts: {}",
                            self.max_retries,
                            e
                        ));
                    }
                    warn!(attempt = attempts, max = self.max_retries, error = %e, "connect attempt failed, retrying");
                    sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn forward_requests(
        mut sink: impl Sink<SubscribeRequest> + Unpin,
        mut rx: mpsc::UnboundedReceiver<SubscribeRequest>,
    ) {
        while let Some(req) = rx.recv().await {
            if sink.send(req).await.is_err() {
                warn!("subscription sink closed, stopping request forwarder");
                break;
            }
        }
    }

    fn create_stream(
        mut stream: impl Stream<Item = Result<yellowstone_grpc_proto::geyser::SubscribeUpdate, tonic::Status>>
            + Unpin
            + Send
            + 'static,
    ) -> impl Stream<Item = Result<UpdateOneof>> {
        async_stream::stream! {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(msg) => {
                        if let Some(update) = msg.update_oneof {
                            yield Ok(update);
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "subscription stream error");
                        yield Err(anyhow::anyhow!("stream error: {}", e));
                        break;
                    }
                }
            }
        }
    }

    /// Builds the §6 subscription request: votes and failed transactions
    /// excluded, `account_include` set to the curated trading-program list.
    pub fn create_subscription_request(&self, account_include: &[String]) -> SubscribeRequest {
        let mut transactions = HashMap::new();
        transactions.insert(
            "cabal_detector".to_string(),
            SubscribeRequestFilterTransactions {
                vote: Some(false),
                failed: Some(false),
                signature: None,
                account_include: account_include.to_vec(),
                account_exclude: vec![],
                account_required: vec![],
            },
        );

        SubscribeRequest {
            accounts: HashMap::new(),
            slots: HashMap::new(),
            transactions,
            blocks: HashMap::new(),
            blocks_meta: HashMap::new(),
            entry: HashMap::new(),
            commitment: Some(CommitmentLevel::Confirmed as i32),
            accounts_data_slice: vec![],
            ping: None,
            transactions_status: HashMap::new(),
            from_slot: None,
        }
    }

    /// A ping request, sent periodically on the same bidi stream to keep the
    /// gateway connection alive (§6: "keeps the stream open and periodically
    /// pings").
    pub fn ping_request() -> SubscribeRequest {
        SubscribeRequest {
            accounts: HashMap::new(),
            slots: HashMap::new(),
            transactions: HashMap::new(),
            blocks: HashMap::new(),
            blocks_meta: HashMap::new(),
            entry: HashMap::new(),
            commitment: None,
            accounts_data_slice: vec![],
            ping: Some(SubscribeRequestPing { id: 1 }),
            transactions_status: HashMap::new(),
            from_slot: None,
        }
    }
}
