use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::{
    types::{Message as SqsMessage, MessageSystemAttributeName, QueueAttributeName},
    Client,
};
use ql_common::ReceivedMessage;
use tracing::{debug, info, warn};

use crate::{
    BrokerQueueAttributes, DestinationResolver, MessageSender, QueueBroker, QueueError,
    ReceiveRequest, Result,
};

/// SQS returns at most this many messages per receive call
pub const MAX_RECEIVE_BATCH: usize = 10;

/// SQS long-poll ceiling in seconds
pub const MAX_WAIT_TIME_SECONDS: i32 = 20;

/// Build an SQS client. `endpoint_url` points at LocalStack/ElasticMQ in development.
pub async fn load_client(region: Option<&str>, endpoint_url: Option<&str>) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    if let Some(endpoint_url) = endpoint_url {
        info!(endpoint = %endpoint_url, "Configuring SQS client with custom endpoint");
        loader = loader.endpoint_url(endpoint_url);
    }
    Client::new(&loader.load().await)
}

/// AWS SQS broker
pub struct SqsBroker {
    client: Client,
    auto_create: bool,
}

impl SqsBroker {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            auto_create: false,
        }
    }

    /// Create queues that do not exist when they are first resolved
    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn convert(sqs_msg: SqsMessage) -> Option<ReceivedMessage> {
        let receipt_handle = sqs_msg.receipt_handle()?.to_string();
        let mut message = ReceivedMessage::new(receipt_handle, sqs_msg.body().unwrap_or_default());
        message.message_id = sqs_msg.message_id().map(|s| s.to_string());

        if let Some(attributes) = sqs_msg.attributes() {
            for (name, value) in attributes {
                message
                    .attributes
                    .insert(name.as_str().to_string(), value.clone());
            }
        }
        if let Some(attributes) = sqs_msg.message_attributes() {
            for (name, value) in attributes {
                if let Some(text) = value.string_value() {
                    message.message_attributes.insert(name.clone(), text.to_string());
                }
            }
        }

        Some(message)
    }

    async fn create_queue(&self, queue_name: &str) -> Result<String> {
        let result = self
            .client
            .create_queue()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        let url = result
            .queue_url()
            .ok_or_else(|| QueueError::Broker("CreateQueue returned no queue URL".to_string()))?;

        info!(queue = %queue_name, url = %url, "Created SQS queue");
        Ok(url.to_string())
    }
}

#[async_trait]
impl QueueBroker for SqsBroker {
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<ReceivedMessage>> {
        let mut call = self
            .client
            .receive_message()
            .queue_url(&request.destination)
            .max_number_of_messages(request.max_messages.clamp(1, MAX_RECEIVE_BATCH) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All");

        if let Some(visibility) = request.visibility_timeout {
            call = call.visibility_timeout(visibility.as_secs() as i32);
        }
        if let Some(wait) = request.wait_time {
            call = call.wait_time_seconds((wait.as_secs() as i32).clamp(0, MAX_WAIT_TIME_SECONDS));
        }

        let result = call
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        let mut messages = Vec::new();
        for sqs_msg in result.messages.unwrap_or_default() {
            let message_id = sqs_msg.message_id().map(|s| s.to_string());
            match Self::convert(sqs_msg) {
                Some(message) => messages.push(message),
                None => warn!(
                    destination = %request.destination,
                    message_id = ?message_id,
                    "Skipping SQS message without receipt handle"
                ),
            }
        }

        if !messages.is_empty() {
            debug!(
                destination = %request.destination,
                count = messages.len(),
                "Received messages from SQS"
            );
        }

        Ok(messages)
    }

    async fn delete(&self, destination: &str, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(destination)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        debug!(destination = %destination, "Message deleted from SQS");
        Ok(())
    }

    async fn get_queue_attributes(&self, destination: &str) -> Result<BrokerQueueAttributes> {
        let result = self
            .client
            .get_queue_attributes()
            .queue_url(destination)
            .attribute_names(QueueAttributeName::RedrivePolicy)
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        let redrive_policy = result
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::RedrivePolicy))
            .cloned();

        Ok(BrokerQueueAttributes { redrive_policy })
    }
}

#[async_trait]
impl DestinationResolver for SqsBroker {
    async fn resolve(&self, logical_name: &str) -> Result<String> {
        if crate::is_destination_url(logical_name) {
            return Ok(logical_name.to_string());
        }

        match self.client.get_queue_url().queue_name(logical_name).send().await {
            Ok(result) => result
                .queue_url()
                .map(|url| url.to_string())
                .ok_or_else(|| QueueError::NotFound(logical_name.to_string())),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|err| err.is_queue_does_not_exist())
                    .unwrap_or(false);

                if !missing {
                    return Err(QueueError::Broker(e.to_string()));
                }
                if self.auto_create {
                    return self.create_queue(logical_name).await;
                }
                Err(QueueError::NotFound(logical_name.to_string()))
            }
        }
    }
}

#[async_trait]
impl MessageSender for SqsBroker {
    async fn send(&self, destination: &str, body: &str, delay_seconds: u32) -> Result<String> {
        let result = self
            .client
            .send_message()
            .queue_url(destination)
            .message_body(body)
            .delay_seconds(delay_seconds as i32)
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        Ok(result.message_id().unwrap_or_default().to_string())
    }
}
