use crate::campaign::commands::CommandInvoker;
use crate::campaign::dispatch::BatchDispatcher;
use crate::campaign::pipeline::DeliveryPipeline;
use crate::campaign::segments::SegmentDistributor;
use crate::config::AppConfig;
use crate::delivery::Transport;
use crate::queue::JobQueue;
use crate::sequence::engine::SequenceEngine;
use crate::shared::clock::Clock;
use crate::store::Store;
use crate::tracking::events::EventRecorder;
use crate::tracking::tokens::TokenSigner;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
    pub queue: JobQueue,
    pub signer: TokenSigner,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        queue: JobQueue,
    ) -> Self {
        let signer = TokenSigner::new(config.tracking.hmac_key.as_bytes());
        Self {
            config,
            store,
            transport,
            clock,
            queue,
            signer,
        }
    }

    pub fn invoker(&self) -> CommandInvoker<'_> {
        CommandInvoker::new(self.store.as_ref(), self.clock.as_ref(), &self.queue)
    }

    pub fn pipeline(&self) -> DeliveryPipeline<'_> {
        DeliveryPipeline::new(
            self.store.as_ref(),
            self.transport.as_ref(),
            self.clock.as_ref(),
            &self.signer,
            &self.config.server.public_url,
        )
    }

    pub fn dispatcher(&self) -> BatchDispatcher<'_> {
        BatchDispatcher::new(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.queue,
            self.config.dispatch.page_size,
        )
    }

    pub fn segments(&self) -> SegmentDistributor<'_> {
        SegmentDistributor::new(self.store.as_ref(), self.clock.as_ref(), &self.queue)
    }

    pub fn sequences(&self) -> SequenceEngine<'_> {
        SequenceEngine::new(
            self.store.as_ref(),
            self.transport.as_ref(),
            self.clock.as_ref(),
            &self.queue,
        )
    }

    pub fn recorder(&self) -> EventRecorder<'_> {
        EventRecorder::new(self.store.as_ref(), self.clock.as_ref())
    }
}
