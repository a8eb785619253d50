use std::sync::Arc;

use anyhow::{Context, anyhow};
use proddash_shared::Role;
use tracing::{debug, info, instrument};

use crate::analytics::Analytics;
use crate::billing::Billing;
use crate::cli::{Command, ProfileAction, TaskAction};
use crate::config::ClientConfig;
use crate::dashboard::{Dashboard, DashboardTab, RouteAccess};
use crate::forms::{FormError, LoginForm, PasswordForm, ProfileForm, RegisterForm, Settings};
use crate::http::{ApiClient, AuthRedirect, Transport};
use crate::render::Renderer;
use crate::session::{Session, SessionCell, SessionStore};
use crate::storage::Storage;
use crate::tasks::TaskBoard;

/// Every service the front end talks to, wired around one client and one
/// session cell.
pub struct App {
    pub api: Arc<ApiClient>,
    pub session: SessionStore,
    pub board: Arc<TaskBoard>,
    pub billing: Billing,
    pub settings: Settings,
    pub dashboard: Dashboard,
}

impl App {
    pub fn wire(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
        redirect: Arc<dyn AuthRedirect>,
    ) -> Self {
        let cell = Arc::new(SessionCell::new(storage));
        let api = Arc::new(ApiClient::new(transport, config, cell.clone(), redirect));
        let session = SessionStore::new(api.clone(), cell);
        let board = Arc::new(TaskBoard::new(api.clone()));
        let billing = Billing::new(api.clone());
        let dashboard = Dashboard::new(
            session.clone(),
            board.clone(),
            Analytics::new(api.clone()),
            billing.clone(),
        );

        Self {
            settings: Settings::new(api.clone(), session.clone()),
            api,
            session,
            board,
            billing,
            dashboard,
        }
    }
}

#[instrument(skip(app, renderer, command))]
pub async fn dispatch(app: &App, renderer: &Renderer, command: Command) -> anyhow::Result<()> {
    if command.needs_session() {
        let status = app.session.initialize().await;
        debug!(authenticated = status.session().is_some(), "session restored");
    }

    match command {
        Command::Login { email, password } => cmd_login(app, renderer, email, password).await,
        Command::Register {
            name,
            email,
            password,
            confirm,
        } => {
            let form = RegisterForm {
                name,
                email,
                password,
                confirm_password: confirm,
            };
            cmd_register(app, renderer, form).await
        }
        Command::Logout => {
            app.session.logout();
            renderer.notice("Logged out.")
        }
        Command::Whoami => match app.session.current() {
            Some(session) => renderer.print_session(&session),
            None => renderer.notice("Not logged in."),
        },
        Command::Tasks { action } => cmd_tasks(app, renderer, action).await,
        Command::Plans => {
            let catalogue = app.billing.load_plans().await;
            let current = app.session.current().map(|session| session.role);
            renderer.print_plans(&catalogue, current)
        }
        Command::Analytics => cmd_dashboard(app, renderer, DashboardTab::Analytics).await,
        Command::Subscribe { plan } => cmd_subscribe(app, renderer, plan).await,
        Command::Portal => {
            require_session(app)?;
            let url = app.billing.portal_url().await?;
            renderer.notice(&format!("Manage your subscription at: {url}"))
        }
        Command::Profile {
            action: ProfileAction::Update { name, email },
        } => {
            require_session(app)?;
            let updated = app
                .settings
                .save_profile(&ProfileForm { name, email })
                .await
                .map_err(form_error)?;
            match updated {
                Some(identity) => {
                    renderer.notice(&format!("Profile updated for {}.", identity.email))
                }
                None => renderer.notice("Profile updated successfully!"),
            }
        }
        Command::Password {
            current,
            new,
            confirm,
        } => {
            require_session(app)?;
            app.settings
                .change_password(&PasswordForm {
                    current,
                    new,
                    confirm,
                })
                .await
                .map_err(form_error)?;
            renderer.notice("Password changed successfully!")
        }
        Command::Dashboard { tab } => {
            let tab = tab.parse::<DashboardTab>().unwrap_or_default();
            cmd_dashboard(app, renderer, tab).await
        }
        Command::Health => {
            let body = app.api.health_check().await?;
            renderer.notice(&format!("backend healthy: {body}"))
        }
    }
}

fn require_session(app: &App) -> anyhow::Result<Session> {
    app.session
        .current()
        .ok_or_else(|| anyhow!("not logged in; run `proddash login` first"))
}

fn form_error(err: FormError) -> anyhow::Error {
    match err {
        FormError::Invalid(_) => anyhow!("invalid input: {err}"),
        FormError::Api(err) => err.into(),
    }
}

async fn cmd_login(
    app: &App,
    renderer: &Renderer,
    email: String,
    password: String,
) -> anyhow::Result<()> {
    let form = LoginForm { email, password };
    let errors = form.validate();
    if !errors.is_empty() {
        return Err(form_error(FormError::Invalid(errors)));
    }

    let session = app.session.login(form.email.trim(), &form.password).await?;
    info!(role = %session.role, "login successful");
    renderer.notice(&format!(
        "Login successful! Signed in as {} ({} plan).",
        session.identity.email, session.role
    ))
}

async fn cmd_register(app: &App, renderer: &Renderer, form: RegisterForm) -> anyhow::Result<()> {
    let errors = form.validate();
    if !errors.is_empty() {
        return Err(form_error(FormError::Invalid(errors)));
    }

    let request = form.to_request();
    let session = app
        .session
        .register(
            &request.email,
            &request.password,
            &request.first_name,
            &request.last_name,
        )
        .await?;
    renderer.notice(&format!(
        "Registration successful! Signed in as {}.",
        session.identity.email
    ))
}

async fn cmd_tasks(app: &App, renderer: &Renderer, action: TaskAction) -> anyhow::Result<()> {
    require_session(app)?;
    app.board.fetch().await.context("failed to load tasks")?;

    match action {
        TaskAction::List => renderer.print_tasks(&app.board.tasks()),
        TaskAction::Add { title, description } => {
            let task = app.board.add(&title, &description).await?;
            renderer.notice(&format!("Task added successfully! ({})", task.id))
        }
        TaskAction::Toggle { id } => match app.board.toggle(&id).await? {
            Some(task) if task.completed => {
                renderer.notice(&format!("Task {} marked as completed.", task.id))
            }
            Some(task) => renderer.notice(&format!("Task {} marked as pending.", task.id)),
            None => Err(anyhow!("no task with id {id}")),
        },
        TaskAction::Delete { id } => {
            app.board.delete(&id).await?;
            renderer.notice("Task deleted successfully!")
        }
    }
}

async fn cmd_subscribe(app: &App, renderer: &Renderer, plan: Role) -> anyhow::Result<()> {
    let session = require_session(app)?;
    if session.role == plan {
        return renderer.notice(&format!("Already on the {plan} plan."));
    }
    let url = app.billing.checkout_url(plan).await?;
    renderer.notice(&format!("Complete checkout at: {url}"))
}

async fn cmd_dashboard(app: &App, renderer: &Renderer, tab: DashboardTab) -> anyhow::Result<()> {
    match app.dashboard.select(tab).await {
        Ok(view) => renderer.print_view(&view),
        Err(RouteAccess::RedirectToLogin) => {
            Err(anyhow!("not logged in; run `proddash login` first"))
        }
        Err(access) => Err(anyhow!("session not ready ({access:?})")),
    }
}
