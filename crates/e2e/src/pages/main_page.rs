use super::locators::{ADD_CARD_BUTTON, LOGOUT_BUTTON, MAIN_PATH};
use super::{click, is_visible, wait_visible, ModalComponent};
use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightContext;

/// The card list at `/en`, reachable after login
pub struct MainPage<'a> {
    ctx: &'a PlaywrightContext,
    base_url: &'a str,
}

impl<'a> MainPage<'a> {
    pub fn new(ctx: &'a PlaywrightContext, base_url: &'a str) -> Self {
        Self { ctx, base_url }
    }

    pub async fn open(&self) -> E2eResult<()> {
        super::navigate(self.ctx, &format!("{}{}", self.base_url, MAIN_PATH)).await
    }

    /// Waits up to the action timeout for the logout button
    pub async fn is_logout_button_displayed(&self) -> bool {
        wait_visible(self.ctx, LOGOUT_BUTTON).await.is_ok()
    }

    /// Immediate check, without waiting
    pub async fn is_logged_in_now(&self) -> E2eResult<bool> {
        is_visible(self.ctx, LOGOUT_BUTTON).await
    }

    pub async fn click_add_card(&self) -> E2eResult<ModalComponent<'a>> {
        wait_visible(self.ctx, ADD_CARD_BUTTON)
            .await
            .map_err(|e| E2eError::AssertionFailed(format!("add card button never showed up: {e}")))?;
        click(self.ctx, ADD_CARD_BUTTON).await?;
        Ok(ModalComponent::new(self.ctx))
    }
}
