//! Retrying assertions over page components

use crate::error::{E2eError, E2eResult};
use crate::pages::{wait_until, ModalComponent};

/// Fluent checks on the card modal. Each check retries until the action
/// timeout before failing.
pub struct ModalAssertions<'m, 'a> {
    modal: &'m ModalComponent<'a>,
}

impl<'m, 'a> ModalAssertions<'m, 'a> {
    pub fn new(modal: &'m ModalComponent<'a>) -> Self {
        Self { modal }
    }

    pub async fn be_visible(&self) -> E2eResult<&Self> {
        let modal = self.modal;
        wait_until("#cardModal visible", modal.timeout(), move || modal.is_visible())
            .await
            .map_err(|e| E2eError::AssertionFailed(format!("modal should be visible: {e}")))?;
        Ok(self)
    }

    pub async fn be_hidden(&self) -> E2eResult<&Self> {
        let modal = self.modal;
        wait_until("#cardModal hidden", modal.timeout(), move || async move {
            Ok(!modal.is_visible().await?)
        })
        .await
        .map_err(|e| E2eError::AssertionFailed(format!("modal should be hidden: {e}")))?;
        Ok(self)
    }

    pub async fn have_title(&self, expected: &str) -> E2eResult<&Self> {
        let modal = self.modal;
        let result = wait_until("#modalTitle text", modal.timeout(), move || async move {
            Ok(modal.title().await? == expected)
        })
        .await;

        if result.is_err() {
            let actual = modal.title().await.unwrap_or_else(|e| format!("<{e}>"));
            return Err(E2eError::AssertionFailed(format!(
                "modal title should be '{expected}', was '{actual}'"
            )));
        }
        Ok(self)
    }
}
