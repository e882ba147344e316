use crate::{
    conversation::{
        replies::Response,
        state::{Dialog, WatchStep},
        Conversation, Input,
    },
    domain::ProductId,
    formatting::escape_html,
    messaging::types::{InlineButton, InlineKeyboard, Markup, OutgoingMessage},
    store::{ConversationState, SEARCH_LIMIT},
    Result,
};

const CANCEL_DATA: &str = "cancel";
const MIN_KEYWORD_CHARS: usize = 2;

const PROMPT: &str = "What do you want to watch?\n\n<i>E.g. Ubuntu, Nginx</i>";

fn with_cancel(mut buttons: Vec<InlineButton>) -> Markup {
    buttons.push(InlineKeyboard::button("❌ Cancel", CANCEL_DATA));
    Markup::Inline(InlineKeyboard::new(buttons))
}

fn reprompt(input: &Input<'_>, html: &str) -> Response {
    Response::send(OutgoingMessage::html(input.chat_id, html).with_markup(with_cancel(Vec::new())))
        .answering(input.callback)
}

impl Conversation {
    pub(super) async fn watch_step(
        &self,
        step: WatchStep,
        state: &ConversationState,
        input: &Input<'_>,
    ) -> Result<Response> {
        match step {
            WatchStep::Prompt => self.watch_prompt(state, input).await,
            WatchStep::Search => self.watch_search(state, input).await,
            WatchStep::Select => self.watch_select(input).await,
        }
    }

    async fn watch_prompt(&self, state: &ConversationState, input: &Input<'_>) -> Result<Response> {
        if !self.advance(state, Dialog::Watch(WatchStep::Search)).await? {
            return self.unhandled_step(input).await;
        }
        Ok(reprompt(input, PROMPT))
    }

    async fn watch_search(&self, state: &ConversationState, input: &Input<'_>) -> Result<Response> {
        if let (Some(q), Some(CANCEL_DATA)) = (input.callback, input.callback_data()) {
            self.finish(input.chat_id).await?;
            return Ok(Response::edit(q, "<i>Canceled</i>"));
        }

        let keyword = input.text.unwrap_or_default();
        if keyword.chars().count() < MIN_KEYWORD_CHARS {
            return Ok(reprompt(input, "<i>Keyword must be at least 2 characters</i>"));
        }

        let products = self.store.search_products(keyword, SEARCH_LIMIT).await?;
        if products.is_empty() {
            return Ok(reprompt(input, "<i>No products found. Type another keyword...</i>"));
        }

        if !self.advance(state, Dialog::Watch(WatchStep::Select)).await? {
            return self.unhandled_step(input).await;
        }

        let buttons = products
            .iter()
            .map(|p| InlineKeyboard::button(p.label.clone(), p.id.0.to_string()))
            .collect();
        Ok(Response::send(
            OutgoingMessage::html(input.chat_id, "Choose product:").with_markup(with_cancel(buttons)),
        ))
    }

    async fn watch_select(&self, input: &Input<'_>) -> Result<Response> {
        let Some(q) = input.callback else {
            self.finish(input.chat_id).await?;
            return Ok(Response::notice(input.chat_id, "<i>Invalid command</i>"));
        };

        let data = input.callback_data().unwrap_or_default();
        if data == CANCEL_DATA {
            self.finish(input.chat_id).await?;
            return Ok(Response::edit(q, "<i>Canceled</i>"));
        }

        let Ok(id) = data.parse::<i64>() else {
            self.finish(input.chat_id).await?;
            return Ok(Response::edit(q, "<i>Invalid command</i>"));
        };

        let Some(product) = self.store.product_by_id(ProductId(id)).await? else {
            self.finish(input.chat_id).await?;
            return Ok(Response::edit(q, "<i>Product not found</i>"));
        };

        let label = escape_html(&product.label);
        let already = format!("<i>❌ {label} is already in watch list</i>");

        if self.store.subscription_exists(input.chat_id, product.id).await? {
            self.finish(input.chat_id).await?;
            return Ok(Response::edit(q, already));
        }

        let created = self
            .store
            .create_subscription(input.chat_id, product.id)
            .await?;
        self.finish(input.chat_id).await?;
        if !created {
            return Ok(Response::edit(q, already));
        }

        tracing::info!(chat_id = input.chat_id.0, product = %product.name, "subscription added");
        Ok(Response::edit(
            q,
            format!(
                "✅ {label} added to watch list\n\n<i>*You'll be notified when a new version is released</i>"
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        conversation::{replies::Reply, tests::conversation},
        domain::ChatId,
        messaging::types::Markup,
        store::Store,
        test_support::{callback, seed_products, text},
    };

    #[tokio::test]
    async fn watch_prompts_with_cancel_button() {
        let (store, conv) = conversation();
        let resp = conv.handle(&text(1, "Watch")).await.unwrap();

        match &resp.replies[0] {
            Reply::Send(m) => {
                assert!(m.html.starts_with("What do you want to watch?"));
                let Markup::Inline(kb) = &m.markup else {
                    panic!("expected inline keyboard")
                };
                assert_eq!(kb.buttons[0].callback_data, "cancel");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert_eq!(store.conversation(ChatId(1)).await.unwrap().unwrap().step, 2);
    }

    #[tokio::test]
    async fn short_keyword_reprompts_at_same_step() {
        let (store, conv) = conversation();
        conv.handle(&text(1, "watch")).await.unwrap();

        let resp = conv.handle(&text(1, "a")).await.unwrap();
        assert_eq!(resp.texts(), vec!["<i>Keyword must be at least 2 characters</i>"]);
        assert_eq!(store.conversation(ChatId(1)).await.unwrap().unwrap().step, 2);
    }

    #[tokio::test]
    async fn cancel_button_at_search_edits_message() {
        let (store, conv) = conversation();
        conv.handle(&text(1, "watch")).await.unwrap();

        let resp = conv.handle(&callback(1, Some("cancel"))).await.unwrap();
        assert_eq!(resp.texts(), vec!["<i>Canceled</i>"]);
        assert!(resp.answer_callback.is_some());
        assert!(store.conversation(ChatId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_lists_matches_and_selection_subscribes() {
        let (store, conv) = conversation();
        let ids = seed_products(&store, &[("ubuntu", "Ubuntu"), ("kubuntu", "Kubuntu")]).await;

        conv.handle(&text(1, "watch")).await.unwrap();
        let resp = conv.handle(&text(1, "ubuntu")).await.unwrap();
        match &resp.replies[0] {
            Reply::Send(m) => {
                assert_eq!(m.html, "Choose product:");
                let Markup::Inline(kb) = &m.markup else {
                    panic!("expected inline keyboard")
                };
                let labels: Vec<&str> = kb.buttons.iter().map(|b| b.label.as_str()).collect();
                assert_eq!(labels, vec!["Kubuntu", "Ubuntu", "❌ Cancel"]);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert_eq!(store.conversation(ChatId(1)).await.unwrap().unwrap().step, 3);

        let data = ids[0].0.to_string();
        let resp = conv.handle(&callback(1, Some(&data))).await.unwrap();
        assert!(resp.texts()[0].starts_with("✅ Ubuntu added to watch list"));
        assert!(store.subscription_exists(ChatId(1), ids[0]).await.unwrap());
        assert!(store.conversation(ChatId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_selection_reports_already_watched() {
        let (store, conv) = conversation();
        let ids = seed_products(&store, &[("nginx", "nginx")]).await;
        let data = ids[0].0.to_string();

        conv.handle(&text(1, "watch")).await.unwrap();
        conv.handle(&text(1, "ngi")).await.unwrap();
        let first = conv.handle(&callback(1, Some(&data))).await.unwrap();
        assert!(first.texts()[0].contains("added to watch list"));

        conv.handle(&text(1, "watch")).await.unwrap();
        conv.handle(&text(1, "ngi")).await.unwrap();
        let second = conv.handle(&callback(1, Some(&data))).await.unwrap();
        assert_eq!(second.texts(), vec!["<i>❌ nginx is already in watch list</i>"]);

        assert_eq!(store.watch_list(ChatId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn text_at_selection_step_is_invalid() {
        let (store, conv) = conversation();
        seed_products(&store, &[("nginx", "nginx")]).await;
        conv.handle(&text(1, "watch")).await.unwrap();
        conv.handle(&text(1, "nginx")).await.unwrap();

        let resp = conv.handle(&text(1, "nginx")).await.unwrap();
        assert_eq!(resp.texts(), vec!["<i>Invalid command</i>"]);
        assert!(store.conversation(ChatId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_product_id_is_not_found() {
        let (store, conv) = conversation();
        seed_products(&store, &[("nginx", "nginx")]).await;
        conv.handle(&text(1, "watch")).await.unwrap();
        conv.handle(&text(1, "nginx")).await.unwrap();

        let resp = conv.handle(&callback(1, Some("99999"))).await.unwrap();
        assert_eq!(resp.texts(), vec!["<i>Product not found</i>"]);
        assert!(store.conversation(ChatId(1)).await.unwrap().is_none());
    }
}
