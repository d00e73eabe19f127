//! Selectors and paths of the flashcards UI

pub const LOGIN_PATH: &str = "/login";
pub const MAIN_PATH: &str = "/en";

pub const USERNAME_INPUT: &str = "#username";
pub const PASSWORD_INPUT: &str = "#password";
pub const SUBMIT_BUTTON: &str = "button[type='submit']";
pub const USERNAME_HINT: &str = "#username-error";
pub const PASSWORD_HINT: &str = "#password-error";
pub const LOGIN_ERROR: &str = "#login-error-message";

pub const LOGOUT_BUTTON: &str = "button:has-text('Logout')";
pub const ADD_CARD_BUTTON: &str = "#addCardBtn";

pub const CARD_MODAL: &str = "#cardModal";
pub const MODAL_TITLE: &str = "#modalTitle";
pub const MODAL_CANCEL: &str = "#cancelBtn";
pub const MODAL_SAVE: &str = "#saveBtn";
pub const QUESTION_INPUT: &str = "#questionInput";
pub const ANSWER_INPUT: &str = "#answerInput";
