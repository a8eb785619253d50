use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

pub const BASE_URL_ENV: &str =
  "PRODDASH_API_BASE_URL";
pub const RC_FILE_ENV: &str =
  "PRODDASHRC";
const DEFAULT_DATA_DIR: &str =
  "~/.proddash";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      (
        "api.base_url",
        "http://localhost:8000"
      ),
      ("api.timeout_ms", "10000"),
      ("api.rate_limit_ms", "1000"),
      ("api.max_retries", "3"),
      ("api.retry_delay_ms", "1000"),
      ("data.location", DEFAULT_DATA_DIR),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    Config {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no rc file found; using \
         defaults"
      );
    }

    if let Ok(base_url) =
      std::env::var(BASE_URL_ENV)
      && !base_url.trim().is_empty()
    {
      debug!(base_url = %base_url, "API base URL from environment");
      cfg.map.insert(
        "api.base_url".to_string(),
        base_url.trim().to_string()
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    self
      .map
      .get(key)
      .map(|raw| {
        raw.trim().parse::<u64>().map_err(
          |err| {
            anyhow!(
              "invalid value for \
               {key}: {raw} ({err})"
            )
          }
        )
      })
      .transpose()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Typed settings for the HTTP client
/// wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
  pub base_url:    String,
  pub timeout:     Duration,
  pub rate_limit:  Duration,
  pub max_retries: u32,
  pub retry_delay: Duration
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      base_url:    "http://localhost:8000"
        .to_string(),
      timeout:     Duration::from_millis(
        10_000
      ),
      rate_limit:  Duration::from_millis(
        1000
      ),
      max_retries: 3,
      retry_delay: Duration::from_millis(
        1000
      )
    }
  }
}

impl ClientConfig {
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let defaults = Self::default();
    let millis = |key: &str,
                  fallback: Duration|
     -> anyhow::Result<Duration> {
      Ok(
        cfg
          .get_u64(key)?
          .map(Duration::from_millis)
          .unwrap_or(fallback)
      )
    };

    let max_retries = match cfg
      .get_u64("api.max_retries")?
    {
      | Some(value) => {
        u32::try_from(value).context(
          "api.max_retries is too \
           large"
        )?
      }
      | None => defaults.max_retries
    };

    let base_url = cfg
      .get("api.base_url")
      .map(|url| {
        url.trim_end_matches('/').to_string()
      })
      .filter(|url| !url.is_empty())
      .unwrap_or(defaults.base_url);

    Ok(Self {
      base_url,
      timeout: millis(
        "api.timeout_ms",
        defaults.timeout
      )?,
      rate_limit: millis(
        "api.rate_limit_ms",
        defaults.rate_limit
      )?,
      max_retries,
      retry_delay: millis(
        "api.retry_delay_ms",
        defaults.retry_delay
      )?
    })
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => {
      let location = cfg
        .get("data.location")
        .unwrap_or_else(|| {
          DEFAULT_DATA_DIR.to_string()
        });
      expand_tilde(Path::new(&location))
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_FILE_ENV)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  let candidate =
    home.join(".proddashrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}
