//! `${{ name }}` rendering for files written to hosts.

use std::collections::HashMap;

use thiserror::Error;

/// nginx site that routes every unmatched virtual host to Dokku's default app.
pub const NGINX_DEFAULT_SITE: &str = r#"server {
  listen      [::]:80 default_server;
  listen      80 default_server;
  server_name ${{ fqdn }};

  location / {
    return 404;
  }

  access_log  /var/log/nginx/${{ fqdn }}-access.log;
  error_log   /var/log/nginx/${{ fqdn }}-error.log;
}
"#;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template references unknown value '{0}'")]
    Unresolved(String),
    #[error("template has an unterminated '${{{{' expression")]
    Unterminated,
}

/// Substitute every `${{ name }}` in `template` with its value from `values`.
pub fn render(template: &str, values: &HashMap<&str, &str>) -> Result<String, TemplateError> {
    let mut rendered = String::with_capacity(template.len());
    let mut remainder = template;

    while let Some(start) = remainder.find("${{") {
        rendered.push_str(&remainder[..start]);
        let after_start = &remainder[start + 3..];
        let end = after_start.find("}}").ok_or(TemplateError::Unterminated)?;
        let name = after_start[..end].trim();
        let value = values.get(name).ok_or_else(|| TemplateError::Unresolved(name.to_string()))?;
        rendered.push_str(value);
        remainder = &after_start[end + 2..];
    }
    rendered.push_str(remainder);
    Ok(rendered)
}

/// Render [`NGINX_DEFAULT_SITE`] for `fqdn`.
pub fn render_default_site(fqdn: &str) -> Result<String, TemplateError> {
    render(NGINX_DEFAULT_SITE, &HashMap::from([("fqdn", fqdn)]))
}
