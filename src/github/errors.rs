use octocrab::Error as OctocrabError;

#[derive(Debug)]
pub enum GitHubError {
    TokenNotFound(String),
    ConfigNotFound(String),
    ApiError(OctocrabError),
    /// A non-success HTTP status reported outside of octocrab
    Http {
        status: u16,
        message: String,
    },
    Timeout {
        operation: String,
        duration_ms: u64,
    },
    NetworkError(String),
    InvalidResponse(String),
    Encoding(serde_json::Error),
}

impl From<OctocrabError> for GitHubError {
    fn from(err: OctocrabError) -> Self {
        GitHubError::ApiError(err)
    }
}

impl From<serde_json::Error> for GitHubError {
    fn from(err: serde_json::Error) -> Self {
        GitHubError::Encoding(err)
    }
}

impl GitHubError {
    /// HTTP status code carried by the error, if the server answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GitHubError::ApiError(OctocrabError::GitHub { source, .. }) => {
                Some(source.status_code.as_u16())
            }
            GitHubError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message reported by the server or transport, without remediation text
    pub fn message(&self) -> String {
        match self {
            GitHubError::TokenNotFound(msg)
            | GitHubError::ConfigNotFound(msg)
            | GitHubError::NetworkError(msg)
            | GitHubError::InvalidResponse(msg) => msg.clone(),
            GitHubError::ApiError(OctocrabError::GitHub { source, .. }) => source.message.clone(),
            GitHubError::ApiError(err) => err.to_string(),
            GitHubError::Http { message, .. } => message.clone(),
            GitHubError::Timeout {
                operation,
                duration_ms,
            } => format!("operation '{operation}' timed out after {duration_ms}ms"),
            GitHubError::Encoding(err) => err.to_string(),
        }
    }

    /// Whether the failure happened below HTTP (connection, DNS, TLS, timeout)
    pub fn is_transport_failure(&self) -> bool {
        match self {
            GitHubError::NetworkError(_) | GitHubError::Timeout { .. } => true,
            GitHubError::ApiError(err) => matches!(
                err,
                OctocrabError::Http { .. } | OctocrabError::Service { .. }
            ),
            _ => false,
        }
    }

    /// One-line form used in logs and persisted results
    pub fn brief(&self) -> String {
        match self.status_code() {
            Some(status) => format!("HTTP {status}: {}", self.message()),
            None => self.message(),
        }
    }
}

impl std::fmt::Display for GitHubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitHubError::TokenNotFound(msg) => {
                writeln!(f, "GitHub Authentication Error")?;
                writeln!(f, "──────────────────────────")?;
                write!(f, "🔑 {msg}\n\n")?;
                writeln!(f, "🔧 QUICK FIXES:")?;
                writeln!(f, "   → Use GitHub CLI: gh auth login")?;
                writeln!(f, "   → Set token directly: export WIGGUM_GITHUB__TOKEN=your_token")?;
                write!(f, "   → Or export GITHUB_TOKEN=\"$(gh auth token)\"")
            }
            GitHubError::ConfigNotFound(msg) => {
                writeln!(f, "GitHub Configuration Error")?;
                writeln!(f, "─────────────────────────")?;
                write!(f, "📂 {msg}\n\n")?;
                writeln!(f, "🔧 QUICK FIXES:")?;
                writeln!(f, "   → Add [github] owner/repo to wiggum.toml")?;
                writeln!(f, "   → Or export WIGGUM_GITHUB__OWNER=owner WIGGUM_GITHUB__REPO=repo")?;
                write!(f, "   → Check the origin remote: git remote get-url origin")
            }
            GitHubError::ApiError(OctocrabError::GitHub { source, .. }) => {
                write_status_help(f, source.status_code.as_u16(), &source.message)
            }
            GitHubError::Http { status, message } => write_status_help(f, *status, message),
            GitHubError::ApiError(octocrab_err) if self.is_transport_failure() => {
                writeln!(f, "GitHub Network Error")?;
                writeln!(f, "───────────────────")?;
                write!(f, "🌐 {octocrab_err}\n\n")?;
                write_network_help(f)
            }
            GitHubError::ApiError(octocrab_err) => {
                writeln!(f, "GitHub API Error")?;
                writeln!(f, "────────────────")?;
                write!(f, "🌐 {octocrab_err}\n\n")?;
                writeln!(f, "🔧 TROUBLESHOOTING:")?;
                writeln!(f, "   → Check authentication: gh auth status")?;
                writeln!(f, "   → Verify repository access: gh repo view")?;
                write!(f, "   → Check rate limits: gh api rate_limit")
            }
            GitHubError::Timeout {
                operation,
                duration_ms,
            } => {
                writeln!(f, "GitHub Operation Timeout")?;
                writeln!(f, "─────────────────────────")?;
                write!(f, "⏰ Operation '{operation}' timed out after {duration_ms}ms\n\n")?;
                writeln!(f, "🔧 RECOMMENDED ACTIONS:")?;
                writeln!(f, "   → Check network connectivity")?;
                writeln!(f, "   → Retry the operation")?;
                write!(f, "   → Check GitHub status: https://www.githubstatus.com")
            }
            GitHubError::NetworkError(msg) => {
                writeln!(f, "GitHub Network Error")?;
                writeln!(f, "───────────────────")?;
                write!(f, "🌐 {msg}\n\n")?;
                write_network_help(f)
            }
            GitHubError::InvalidResponse(msg) => {
                writeln!(f, "Unexpected GitHub Response")?;
                writeln!(f, "──────────────────────────")?;
                write!(f, "📄 {msg}\n\n")?;
                writeln!(f, "🔧 TROUBLESHOOTING:")?;
                writeln!(f, "   → Retry the command")?;
                write!(f, "   → Inspect the resource manually: gh issue view / gh pr view")
            }
            GitHubError::Encoding(err) => {
                writeln!(f, "State Encoding Error")?;
                writeln!(f, "────────────────────")?;
                write!(f, "🧩 {err}\n\n")?;
                write!(f, "🔧 This is a bug in wiggum; the resource body was not modified")
            }
        }
    }
}

impl std::error::Error for GitHubError {}

fn write_status_help(
    f: &mut std::fmt::Formatter<'_>,
    status: u16,
    message: &str,
) -> std::fmt::Result {
    writeln!(f, "GitHub API Error")?;
    writeln!(f, "────────────────")?;
    writeln!(f, "🌐 HTTP {status}: {message}")?;
    writeln!(f)?;

    match status {
        401 => {
            writeln!(f, "🔧 AUTHENTICATION FAILED:")?;
            writeln!(f, "   → Token is invalid or expired")?;
            writeln!(f, "   → Run: gh auth login")?;
            write!(f, "   → Or export GITHUB_TOKEN=\"$(gh auth token)\"")
        }
        403 | 429 if mentions_rate_limit(message) || status == 429 => {
            writeln!(f, "🔧 RATE LIMITED:")?;
            writeln!(f, "   → Wait for the limit to reset and rerun the command")?;
            write!(f, "   → Check current status: gh api rate_limit")
        }
        403 => {
            writeln!(f, "🔧 PERMISSION DENIED:")?;
            writeln!(f, "   → Token lacks required permissions")?;
            writeln!(f, "   → Check repository access: gh repo view")?;
            write!(f, "   → May need 'repo' scope: https://github.com/settings/tokens")
        }
        404 => {
            writeln!(f, "🔧 RESOURCE NOT FOUND:")?;
            writeln!(f, "   → The issue or pull request may have been deleted or transferred")?;
            writeln!(f, "   → Check the configured owner and repo")?;
            write!(f, "   → Verify access: gh repo view")
        }
        500..=599 => {
            writeln!(f, "🔧 GITHUB SERVER ERROR:")?;
            writeln!(f, "   → Usually transient; rerun the command")?;
            write!(f, "   → Check GitHub status: https://www.githubstatus.com")
        }
        _ => {
            writeln!(f, "🔧 TROUBLESHOOTING:")?;
            writeln!(f, "   → Check authentication: gh auth status")?;
            writeln!(f, "   → Verify repository access: gh repo view")?;
            write!(f, "   → Check rate limits: gh api rate_limit")
        }
    }
}

fn write_network_help(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let is_ci = std::env::var("CI").is_ok() || std::env::var("GITHUB_ACTIONS").is_ok();
    let has_proxy = std::env::var("HTTP_PROXY").is_ok() || std::env::var("HTTPS_PROXY").is_ok();

    if is_ci {
        writeln!(f, "🔧 CI/CD TROUBLESHOOTING:")?;
        writeln!(f, "   → Check runner network configuration")?;
        writeln!(f, "   → Verify internet access is enabled")?;
    } else if has_proxy {
        writeln!(f, "🔧 PROXY ENVIRONMENT DETECTED:")?;
        writeln!(f, "   → Verify proxy settings are correct")?;
        writeln!(f, "   → Test: curl -v --proxy $HTTPS_PROXY https://api.github.com")?;
    } else {
        writeln!(f, "🔧 LOCAL TROUBLESHOOTING:")?;
        writeln!(f, "   → Verify DNS resolution: nslookup api.github.com")?;
        writeln!(f, "   → Test HTTPS access: curl -I https://api.github.com")?;
    }
    write!(f, "   → GitHub status page: https://www.githubstatus.com")
}

/// Whether an error message describes a rate limit (primary or secondary)
pub fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("ratelimit") || lower.contains("too many requests")
}
