//! Repository URL normalisation.

use url::Url;

/// Rewrite SSH-style git URLs to HTTPS when `prefer_https` is set.
///
/// `git@host:org/repo.git` and `ssh://git@host/org/repo` both become
/// `https://host/org/repo(.git)`. Anything else is returned unchanged.
pub fn normalize_repo_url(raw: &str, prefer_https: bool) -> String {
    let raw = raw.trim();
    if !prefer_https {
        return raw.to_string();
    }

    if raw.starts_with("ssh://") {
        if let Ok(parsed) = Url::parse(raw)
            && let Some(host) = parsed.host_str()
        {
            return format!("https://{}{}", host, parsed.path());
        }
        return raw.to_string();
    }

    // scp-like syntax: [user@]host:path, with no scheme
    if !raw.contains("://")
        && let Some((authority, path)) = raw.split_once(':')
        && !path.starts_with('/')
        && !authority.is_empty()
    {
        let host = authority.rsplit('@').next().unwrap_or(authority);
        return format!("https://{}/{}", host, path.trim_start_matches('/'));
    }

    raw.to_string()
}
