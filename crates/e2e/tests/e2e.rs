//! E2E test harness entry point
//!
//! This file is the test binary that runs the browser scenarios against a
//! live flashcards application.
//! Run with: cargo test --package flashcards-e2e --test e2e -- --set HEADLESS=true
//!
//! Needs TEST_USERNAME and TEST_PASSWORD; without them the suite is skipped.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{error, info, warn};

use flashcards_e2e::accounts::{AccountsApi, DbAdmin, TestUser};
use flashcards_e2e::assertions::ModalAssertions;
use flashcards_e2e::config::{
    log_filter, parse_properties, ConfigSources, Credentials, Settings,
};
use flashcards_e2e::error::{E2eError, E2eResult};
use flashcards_e2e::pages::locators::{LOGOUT_BUTTON, MAIN_PATH};
use flashcards_e2e::pages::{
    wait_until, LoginPage, MainPage, SubmitMethod, ACCOUNT_LOCKED_HINT, EMPTY_PASSWORD_HINT,
    EMPTY_USERNAME_HINT, INVALID_CREDENTIALS_HINT, LOCKOUT_THRESHOLD,
};
use flashcards_e2e::report::ResultsDir;
use flashcards_e2e::runner::{run_suite, write_results, Severity, SuitePlan, TestCase};
use flashcards_e2e::{PlaywrightContext, PlaywrightEngine};

#[derive(Parser, Debug)]
#[command(name = "flashcards-e2e")]
#[command(about = "Browser E2E suite for the flashcards app")]
struct Args {
    /// Run only tests whose name contains this
    filter: Option<String>,

    /// Override a setting, e.g. --set HEADLESS=true
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// TOML config file (default: flashcards-e2e.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List test names and exit
    #[arg(long)]
    list: bool,

    /// Accepted for `cargo test -- --nocapture` compatibility
    #[arg(long, hide = true)]
    nocapture: bool,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let args = Args::parse();

    // Run async main
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    let result = rt.block_on(async_main(args));

    match result {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Suite aborted: {}", e);
            let checklist = e.checklist();
            if !checklist.is_empty() {
                eprintln!("\nChecklist:");
                for item in checklist {
                    eprintln!("  - {}", item);
                }
            }
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let mut properties = parse_properties(&args.set)?;
    if let Some(path) = &args.config {
        properties.insert("E2E_CONFIG".to_string(), path.display().to_string());
    }
    let settings = Arc::new(Settings::resolve(&ConfigSources::from_process(properties)?)?);

    let Some(credentials) = settings.credentials.clone() else {
        warn!("{}; skipping the E2E suite", E2eError::MissingCredentials);
        return Ok(true);
    };

    let mut cases = scenarios(&settings, &credentials);
    if let Some(filter) = &args.filter {
        cases.retain(|c| c.name.contains(filter.as_str()));
    }
    if args.list {
        for case in &cases {
            println!("{}", case.name);
        }
        return Ok(true);
    }

    let results_dir = Arc::new(ResultsDir::create(&settings.results_dir)?);
    let plan = SuitePlan::from_settings(&settings);
    let browser = settings.browser;

    let results = run_suite(
        &plan,
        || PlaywrightEngine::start(browser),
        results_dir.clone(),
        &cases,
    )
    .await?;

    write_results(results_dir.root(), &results)?;
    results_dir.write_index()?;

    Ok(results.success())
}

/// Test body with the suite settings and the test's context
fn scenario<F>(name: &str, settings: &Arc<Settings>, body: F) -> TestCase<PlaywrightContext>
where
    F: for<'a> Fn(Arc<Settings>, &'a PlaywrightContext) -> BoxFuture<'a, E2eResult<()>>
        + Send
        + Sync
        + 'static,
{
    let settings = settings.clone();
    TestCase::new(name, move |ctx| body(settings.clone(), ctx.handle()))
}

fn check(condition: bool, message: &str) -> E2eResult<()> {
    if condition {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(message.to_string()))
    }
}

fn check_eq(expected: &str, actual: &str, what: &str) -> E2eResult<()> {
    check(
        expected == actual,
        &format!("{what}: expected '{expected}', got '{actual}'"),
    )
}

fn scenarios(settings: &Arc<Settings>, credentials: &Credentials) -> Vec<TestCase<PlaywrightContext>> {
    let mut cases = Vec::new();
    let creds = Arc::new(credentials.clone());
    let primary_login = credentials
        .email
        .clone()
        .unwrap_or_else(|| credentials.username.clone());

    // Valid logins: every identifier, padded with whitespace, by click and Enter
    let mut logins = vec![("username", credentials.username.clone())];
    if let Some(email) = &credentials.email {
        logins.push(("email", email.clone()));
    }
    let padded: Vec<_> = logins
        .iter()
        .map(|(label, login)| (*label, format!("  {login}  "), true))
        .collect();
    let logins = logins
        .into_iter()
        .map(|(label, login)| (label, login, false))
        .chain(padded);

    for (label, login, padded) in logins {
        for method in [SubmitMethod::Click, SubmitMethod::Enter] {
            let name = format!(
                "login_with_valid_credentials[{label}{}-{method}]",
                if padded { "-whitespace" } else { "" }
            );
            let creds = creds.clone();
            let login = login.clone();
            cases.push(
                scenario(&name, settings, move |s, ctx| {
                    login_succeeds(s, ctx, login.clone(), creds.password.clone(), method).boxed()
                })
                .epic("Login")
                .feature("Successful login")
                .story("User logs in with valid credentials")
                .severity(Severity::Critical),
            );
        }
    }

    {
        let login = primary_login.clone();
        let creds = creds.clone();
        cases.push(
            scenario("login_with_password_leading_trailing_spaces", settings, move |s, ctx| {
                login_succeeds(
                    s,
                    ctx,
                    login.clone(),
                    format!(" {} ", creds.password),
                    SubmitMethod::Click,
                )
                .boxed()
            })
            .epic("Login")
            .feature("Successful login")
            .story("User logs in with leading/trailing spaces")
            .severity(Severity::Critical),
        );
    }

    {
        let creds = creds.clone();
        cases.push(
            scenario("login_with_invalid_email_format", settings, move |s, ctx| {
                rejected_with_error(s, ctx, "user@".to_string(), creds.password.clone()).boxed()
            })
            .epic("Login")
            .feature("Form Validation")
            .story("Server-side email validation")
            .description("Invalid email format (user@) triggers the server-side error"),
        );
    }

    {
        let creds = creds.clone();
        cases.push(
            scenario("login_with_empty_username", settings, move |s, ctx| {
                let password = creds.password.clone();
                async move {
                    let page = LoginPage::new(ctx, &s.base_url);
                    page.open().await?;
                    page.attempt_with_empty_username(&password).await?;
                    check(page.is_current().await?, "should remain on the login page")?;
                    check_eq(EMPTY_USERNAME_HINT, &page.username_hint().await?, "username hint")
                }
                .boxed()
            })
            .epic("Login")
            .feature("Form Validation")
            .story("Empty field validation"),
        );
    }

    {
        let creds = creds.clone();
        cases.push(
            scenario("login_with_empty_password", settings, move |s, ctx| {
                let username = creds.username.clone();
                async move {
                    let page = LoginPage::new(ctx, &s.base_url);
                    page.open().await?;
                    page.attempt_with_empty_password(&username).await?;
                    check(page.is_current().await?, "should remain on the login page")?;
                    check_eq(EMPTY_PASSWORD_HINT, &page.password_hint().await?, "password hint")
                }
                .boxed()
            })
            .epic("Login")
            .feature("Form Validation")
            .story("Empty field validation"),
        );
    }

    cases.push(
        scenario("login_with_empty_username_and_password", settings, |s, ctx| {
            async move {
                let page = LoginPage::new(ctx, &s.base_url);
                page.open().await?;
                page.attempt_with_empty_fields().await?;
                check(page.is_current().await?, "should remain on the login page")?;
                check_eq(EMPTY_PASSWORD_HINT, &page.password_hint().await?, "password hint")?;
                check_eq(EMPTY_USERNAME_HINT, &page.username_hint().await?, "username hint")
            }
            .boxed()
        })
        .epic("Login")
        .feature("Form Validation")
        .story("Empty field validation"),
    );

    {
        let creds = creds.clone();
        cases.push(
            scenario("login_with_incorrect_password", settings, move |s, ctx| {
                rejected_with_error(s, ctx, creds.username.clone(), "wrong_password".to_string())
                    .boxed()
            })
            .epic("Login")
            .feature("Form Validation")
            .story("Invalid credentials"),
        );
    }

    cases.push(
        scenario("login_with_non_existent_user", settings, |s, ctx| {
            rejected_with_error(
                s,
                ctx,
                "NonExistentUser".to_string(),
                "NonExistentPassword".to_string(),
            )
            .boxed()
        })
        .epic("Login")
        .feature("Form Validation")
        .story("Invalid credentials"),
    );

    cases.push(
        scenario("login_with_sql_injection_is_rejected", settings, |s, ctx| {
            injection_rejected(s, ctx, "' OR '1'='1", "' OR '1'='1' --").boxed()
        })
        .epic("Login")
        .feature("Security")
        .story("SQL injection prevention")
        .severity(Severity::Critical),
    );

    cases.push(
        scenario("login_with_xss_injection_is_rejected", settings, |s, ctx| {
            injection_rejected(
                s,
                ctx,
                "<script>alert('x')</script>",
                "<script>alert('x')</script>",
            )
            .boxed()
        })
        .epic("Login")
        .feature("Security")
        .story("XSS injection prevention")
        .severity(Severity::Critical),
    );

    {
        let login = primary_login.clone();
        let creds = creds.clone();
        cases.push(
            scenario("add_card_modal_opens", settings, move |s, ctx| {
                add_card_modal(s, ctx, login.clone(), creds.password.clone()).boxed()
            })
            .epic("Cards")
            .feature("Modal")
            .story("Open add card modal")
            .description("The add card modal opens with its title and closes on cancel"),
        );
    }

    cases.push(
        scenario("account_locks_after_repeated_failures", settings, |s, ctx| {
            account_lockout(s, ctx).boxed()
        })
        .epic("Login")
        .feature("Security")
        .story("Account lockout")
        .severity(Severity::Critical),
    );

    {
        let login = primary_login.clone();
        let creds = creds.clone();
        cases.push(
            scenario("session_persists_across_reload_and_pages", settings, move |s, ctx| {
                session_persists(s, ctx, login.clone(), creds.password.clone()).boxed()
            })
            .epic("Authentication")
            .feature("Session")
            .story("Session survives reload and a second page"),
        );
    }

    cases.push(
        scenario("fresh_context_starts_logged_out", settings, |s, ctx| {
            fresh_context(s, ctx).boxed()
        })
        .epic("Authentication")
        .feature("Session")
        .story("Each test starts with empty storage"),
    );

    cases
}

async fn login_succeeds(
    settings: Arc<Settings>,
    ctx: &PlaywrightContext,
    login: String,
    password: String,
    method: SubmitMethod,
) -> E2eResult<()> {
    let page = LoginPage::new(ctx, &settings.base_url);
    page.open().await?;
    let main = page.login(&login, &password, method).await?;
    check(
        main.is_logout_button_displayed().await,
        "Logout button should be visible after successful login",
    )
}

async fn rejected_with_error(
    settings: Arc<Settings>,
    ctx: &PlaywrightContext,
    login: String,
    password: String,
) -> E2eResult<()> {
    let page = LoginPage::new(ctx, &settings.base_url);
    page.open().await?;
    page.attempt(&login, &password).await?;
    check(page.is_current().await?, "should remain on the login page")?;
    check_eq(INVALID_CREDENTIALS_HINT, &page.error_message().await?, "login error")
}

async fn injection_rejected(
    settings: Arc<Settings>,
    ctx: &PlaywrightContext,
    login: &str,
    password: &str,
) -> E2eResult<()> {
    let page = LoginPage::new(ctx, &settings.base_url);
    page.open().await?;
    page.attempt_injection(login, password).await?;
    check(page.is_current().await?, "injection attempt should stay on the login page")?;
    check_eq(INVALID_CREDENTIALS_HINT, &page.error_message().await?, "login error")?;
    let main = MainPage::new(ctx, &settings.base_url);
    check(
        !main.is_logged_in_now().await?,
        "user should not be logged in after an injection attempt",
    )
}

async fn add_card_modal(
    settings: Arc<Settings>,
    ctx: &PlaywrightContext,
    login: String,
    password: String,
) -> E2eResult<()> {
    let page = LoginPage::new(ctx, &settings.base_url);
    page.open().await?;
    let main = page.login(&login, &password, SubmitMethod::Click).await?;
    check(main.is_logout_button_displayed().await, "login should succeed")?;

    main.open().await?;
    let modal = main.click_add_card().await?;
    let assert = ModalAssertions::new(&modal);
    assert.be_visible().await?;

    let title = modal.title().await?;
    check(!title.is_empty(), "modal title should not be empty")?;
    assert.have_title(&title).await?;

    modal.click_cancel().await?;
    assert.be_hidden().await?;
    Ok(())
}

async fn account_lockout(settings: Arc<Settings>, ctx: &PlaywrightContext) -> E2eResult<()> {
    let api = AccountsApi::new(&settings.base_url)?;
    let user = api.register_unique().await?;

    let outcome = lock_out(&settings, ctx, &user).await;

    DbAdmin::new(settings.db.clone()).unlock_user(&user.username).await;
    if let Err(e) = api.delete(&user.username).await {
        warn!("Cleanup of '{}' failed: {}", user.username, e);
    }
    outcome
}

async fn lock_out(settings: &Settings, ctx: &PlaywrightContext, user: &TestUser) -> E2eResult<()> {
    let page = LoginPage::new(ctx, &settings.base_url);
    page.open().await?;
    page.fail_repeatedly(&user.username, LOCKOUT_THRESHOLD).await?;

    // The right password no longer gets in
    page.attempt(&user.username, &user.password).await?;
    let message = page.wait_for_error_containing(ACCOUNT_LOCKED_HINT).await?;
    info!("Lockout message: {}", message);
    check(page.is_current().await?, "locked account should stay on the login page")
}

async fn session_persists(
    settings: Arc<Settings>,
    ctx: &PlaywrightContext,
    login: String,
    password: String,
) -> E2eResult<()> {
    let page = LoginPage::new(ctx, &settings.base_url);
    page.open().await?;
    let main = page.login(&login, &password, SubmitMethod::Click).await?;
    check(main.is_logout_button_displayed().await, "login should succeed")?;

    // Navigating again reloads the page from scratch
    main.open().await?;
    check(
        main.is_logout_button_displayed().await,
        "session should survive a reload",
    )?;

    // A second page in the same context shares its cookies
    let second = ctx.context().new_page().await?;
    second.goto(&settings.url(MAIN_PATH), None).await?;
    let logout = second.locator(LOGOUT_BUTTON).await;
    wait_until(
        "logout button on second page",
        ctx.action_timeout(),
        || async { Ok(logout.is_visible().await?) },
    )
    .await
    .map_err(|e| E2eError::AssertionFailed(format!("session should be shared by pages: {e}")))
}

async fn fresh_context(settings: Arc<Settings>, ctx: &PlaywrightContext) -> E2eResult<()> {
    let main = MainPage::new(ctx, &settings.base_url);
    main.open().await?;

    let stored = ctx
        .page()
        .evaluate_value("window.localStorage.length")
        .await?;
    check_eq("0", stored.trim_matches('"'), "localStorage entries")?;
    check(
        !main.is_logged_in_now().await?,
        "a new context should not inherit a login",
    )
}
