use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use proddash_shared::Role;
use tracing::{
  debug,
  instrument
};

use crate::analytics::{
  Analytics,
  AnalyticsSummary
};
use crate::billing::{
  Billing,
  PlanCatalogue
};
use crate::session::{
  Session,
  SessionStatus,
  SessionStore
};
use crate::tasks::{
  Task,
  TaskBoard,
  TaskStats
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum DashboardTab {
  #[default]
  Overview,
  Analytics,
  Tasks,
  Settings,
  Billing
}

impl DashboardTab {
  pub const ALL: [DashboardTab; 5] = [
    DashboardTab::Overview,
    DashboardTab::Analytics,
    DashboardTab::Tasks,
    DashboardTab::Settings,
    DashboardTab::Billing
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | DashboardTab::Overview => {
        "overview"
      }
      | DashboardTab::Analytics => {
        "analytics"
      }
      | DashboardTab::Tasks => "tasks",
      | DashboardTab::Settings => {
        "settings"
      }
      | DashboardTab::Billing => {
        "billing"
      }
    }
  }
}

impl fmt::Display for DashboardTab {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Unknown section names land on the
/// overview.
impl FromStr for DashboardTab {
  type Err = Infallible;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let wanted =
      s.trim().to_ascii_lowercase();
    Ok(
      Self::ALL
        .into_iter()
        .find(|tab| {
          tab.as_str() == wanted
        })
        .unwrap_or_default()
    )
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum RouteAccess {
  /// Session still restoring; render
  /// nothing and do not redirect.
  Pending,
  Granted,
  RedirectToLogin
}

pub fn route_access(
  status: &SessionStatus
) -> RouteAccess {
  match status {
    | SessionStatus::Uninitialized
    | SessionStatus::Initializing => {
      RouteAccess::Pending
    }
    | SessionStatus::Authenticated(
      _
    ) => RouteAccess::Granted,
    | SessionStatus::Anonymous => {
      RouteAccess::RedirectToLogin
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewStats {
  pub greeting: String,
  pub stats:    TaskStats
}

impl OverviewStats {
  pub fn new(
    name: &str,
    stats: TaskStats
  ) -> Self {
    let name = name.trim();
    let greeting = if name.is_empty()
    {
      "Welcome back!".to_string()
    } else {
      format!("Welcome back, {name}!")
    };
    Self { greeting, stats }
  }

  pub fn completion_percent(
    &self
  ) -> u8 {
    self.stats.completion_percent()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TabView {
  Overview(OverviewStats),
  Analytics {
    summary: AnalyticsSummary,
    /// Free plans see an upgrade
    /// prompt instead of the charts.
    locked:  bool
  },
  Tasks {
    tasks: Vec<Task>,
    error: Option<String>
  },
  Settings(Session),
  Billing {
    catalogue:    PlanCatalogue,
    current_plan: Role
  }
}

/// Maps the selected section to the
/// data it needs loaded.
pub struct Dashboard {
  session:   SessionStore,
  board:     Arc<TaskBoard>,
  analytics: Analytics,
  billing:   Billing,
  active:    Mutex<DashboardTab>
}

impl Dashboard {
  pub fn new(
    session: SessionStore,
    board: Arc<TaskBoard>,
    analytics: Analytics,
    billing: Billing
  ) -> Self {
    Self {
      session,
      board,
      analytics,
      billing,
      active: Mutex::new(
        DashboardTab::default()
      )
    }
  }

  pub fn active(&self) -> DashboardTab {
    *self.active.lock()
  }

  #[instrument(skip(self))]
  pub async fn select(
    &self,
    tab: DashboardTab
  ) -> Result<TabView, RouteAccess> {
    let status = self.session.status();
    let access = route_access(&status);
    let Some(session) =
      status.session().cloned()
    else {
      debug!(?access, "dashboard not available");
      return Err(access);
    };

    *self.active.lock() = tab;

    let view = match tab {
      | DashboardTab::Overview => {
        TabView::Overview(
          OverviewStats::new(
            &session.identity.name,
            self.board.stats()
          )
        )
      }
      | DashboardTab::Analytics => {
        let summary =
          self.analytics.load().await;
        TabView::Analytics {
          summary,
          locked: session.role
            == Role::Free
        }
      }
      | DashboardTab::Tasks => {
        // failure is carried in the
        // board's error flag
        let _ =
          self.board.fetch().await;
        TabView::Tasks {
          tasks: self.board.tasks(),
          error: self.board.error()
        }
      }
      | DashboardTab::Settings => {
        TabView::Settings(session)
      }
      | DashboardTab::Billing => {
        TabView::Billing {
          catalogue:    self
            .billing
            .load_plans()
            .await,
          current_plan: session.role
        }
      }
    };
    Ok(view)
  }
}
