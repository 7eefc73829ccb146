// SPDX-License-Identifier: MIT OR Apache-2.0
//! An echo tool listener — returns its payload unchanged, wrapped in a
//! `<echo>` element. Useful for exercising the pipeline end to end
//! without any real side effects.

use agentserver_dispatch::{Handler, HandlerMetadata};
use async_trait::async_trait;
use serde_json::Value;

pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, payload: Value, _metadata: HandlerMetadata) -> anyhow::Result<Vec<u8>> {
        Ok(format!("<echo>{payload}</echo>").into_bytes())
    }
}
