use std::time::Duration;

use super::locators::{
    ANSWER_INPUT, CARD_MODAL, MODAL_CANCEL, MODAL_SAVE, MODAL_TITLE, QUESTION_INPUT,
};
use super::{click, fill, is_visible, visible_text};
use crate::error::E2eResult;
use crate::playwright::PlaywrightContext;

/// Add/edit card dialog
pub struct ModalComponent<'a> {
    ctx: &'a PlaywrightContext,
}

impl<'a> ModalComponent<'a> {
    pub fn new(ctx: &'a PlaywrightContext) -> Self {
        Self { ctx }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.ctx.action_timeout()
    }

    pub async fn is_visible(&self) -> E2eResult<bool> {
        is_visible(self.ctx, CARD_MODAL).await
    }

    pub async fn title(&self) -> E2eResult<String> {
        visible_text(self.ctx, MODAL_TITLE).await
    }

    pub async fn fill_question(&self, text: &str) -> E2eResult<()> {
        fill(self.ctx, QUESTION_INPUT, text).await
    }

    pub async fn fill_answer(&self, text: &str) -> E2eResult<()> {
        fill(self.ctx, ANSWER_INPUT, text).await
    }

    pub async fn click_save(&self) -> E2eResult<()> {
        click(self.ctx, MODAL_SAVE).await
    }

    pub async fn click_cancel(&self) -> E2eResult<()> {
        click(self.ctx, MODAL_CANCEL).await
    }
}
