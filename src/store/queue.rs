// archivetool/src/store/queue.rs
use aws_sdk_sqs as sqs;
use sqs::types::MessageAttributeValue;

use crate::store::{RequestMethod, StatusQueue};

/// All status updates for the restore workflow serialize through one FIFO
/// message group, so the downstream consumer sees them in send order.
const MESSAGE_GROUP_ID: &str = "request_files";

/// Status queue client backed by an SQS FIFO queue.
///
/// Deduplication is content-based and configured on the queue itself; this
/// client only supplies the group id and routing attributes.
pub struct SqsStatusQueue {
    client: sqs::Client,
    queue_url: String,
}

impl SqsStatusQueue {
    pub async fn from_env(queue_url: String) -> Self {
        let sdk_config = aws_config::defaults(sqs::config::BehaviorVersion::latest())
            .load()
            .await;
        SqsStatusQueue {
            client: sqs::Client::new(&sdk_config),
            queue_url,
        }
    }
}

impl StatusQueue for SqsStatusQueue {
    async fn enqueue(
        &self,
        message_body: &str,
        method: RequestMethod,
    ) -> std::result::Result<String, String> {
        let request_method_attr = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(method.as_str())
            .build()
            .map_err(|e| format!("Failed to build RequestMethod attribute: {}", e))?;
        let table_name_attr = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(method.table_name())
            .build()
            .map_err(|e| format!("Failed to build TableName attribute: {}", e))?;

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(message_body)
            .message_group_id(MESSAGE_GROUP_ID)
            .message_attributes("RequestMethod", request_method_attr)
            .message_attributes("TableName", table_name_attr)
            .send()
            .await
            .map_err(|e| format!("Failed to send message to {}: {}", self.queue_url, e))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }
}
