use crate::{
    conversation::{
        replies::Response,
        state::{Dialog, ProductRef, UnwatchStep, UNWATCH},
        Conversation, Input,
    },
    formatting::escape_html,
    messaging::types::{Markup, OutgoingMessage, ReplyKeyboard},
    store::ConversationState,
    Result,
};

const CONFIRM: &str = "Yes";

/// `unwatch_node_js` -> `node-js`
pub(super) fn product_name_from_command(command: &str) -> Option<String> {
    let raw = command.strip_prefix(UNWATCH)?;
    if raw.is_empty() {
        return None;
    }
    Some(raw.replace('_', "-"))
}

/// `node-js` -> `/unwatch_node_js`
pub(super) fn unwatch_command_for(name: &str) -> String {
    format!("/{UNWATCH}{}", name.replace('-', "_"))
}

impl Conversation {
    pub(super) async fn unwatch_step(
        &self,
        step: UnwatchStep,
        state: &ConversationState,
        input: &Input<'_>,
    ) -> Result<Response> {
        match step {
            UnwatchStep::Lookup => self.unwatch_lookup(state, input).await,
            UnwatchStep::Confirm(product) => self.unwatch_confirm(product, input).await,
        }
    }

    async fn unwatch_lookup(&self, state: &ConversationState, input: &Input<'_>) -> Result<Response> {
        let product = match product_name_from_command(&input.command) {
            Some(name) => {
                self.store
                    .subscribed_product_by_name(input.chat_id, &name)
                    .await?
            }
            None => None,
        };

        let Some(product) = product else {
            self.finish(input.chat_id).await?;
            return Ok(
                Response::notice(input.chat_id, "<i>Product not found</i>").answering(input.callback)
            );
        };

        let next = Dialog::Unwatch(UnwatchStep::Confirm(ProductRef {
            product_id: product.id,
            label: product.label.clone(),
        }));
        if !self.advance(state, next).await? {
            return self.unhandled_step(input).await;
        }

        let keyboard = ReplyKeyboard::new(&[&[CONFIRM, "No"]]);
        Ok(Response::send(
            OutgoingMessage::html(
                input.chat_id,
                format!(
                    "Are you sure you want to unwatch <b>{}</b>?",
                    escape_html(&product.label)
                ),
            )
            .with_markup(Markup::Reply(keyboard)),
        ))
    }

    async fn unwatch_confirm(&self, product: ProductRef, input: &Input<'_>) -> Result<Response> {
        if input.text != Some(CONFIRM) {
            self.finish(input.chat_id).await?;
            return Ok(Response::notice(input.chat_id, "<i>Cancelled</i>").answering(input.callback));
        }

        self.store
            .delete_subscription(input.chat_id, product.product_id)
            .await?;
        self.finish(input.chat_id).await?;
        tracing::info!(chat_id = input.chat_id.0, product_id = product.product_id.0, "subscription removed");

        Ok(Response::notice(
            input.chat_id,
            format!("<b>{}</b> removed from watch list", escape_html(&product.label)),
        ))
    }
}
