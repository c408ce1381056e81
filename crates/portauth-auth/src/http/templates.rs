//! Built-in HTML templates.
//!
//! Deliberately minimal server-rendered pages; deployments that want
//! branded UIs front these endpoints with their own forms and post to the
//! same paths. Every form carries the session-bound nonce the engine
//! issued with the render action.

use serde_json::Value;

use crate::AuthResult;
use crate::error::AuthError;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head>\
         <body>{body}</body></html>",
        escape(title)
    )
}

fn str_field<'a>(view: &'a Value, key: &str) -> &'a str {
    view.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Renders a named template with its view model.
///
/// # Errors
///
/// Fails with a server error for template names the engine never emits.
pub fn render(auth_method_id: &str, template: &str, view: &Value) -> AuthResult<String> {
    match template {
        "login" => Ok(login(auth_method_id, view, None)),
        "register" => Ok(register(auth_method_id, view)),
        "select_namespace" => Ok(select_namespace(auth_method_id, view)),
        "grant" => Ok(grant(auth_method_id, view)),
        other => Err(AuthError::server_error(format!(
            "unknown template '{other}'"
        ))),
    }
}

/// The login form, optionally with a failure message.
#[must_use]
pub fn login(auth_method_id: &str, view: &Value, error: Option<&str>) -> String {
    let prefill = escape(str_field(view, "prefillUsername"));
    let error_html = error
        .map(|e| format!("<p class=\"error\">{}</p>", escape(e)))
        .unwrap_or_default();
    let body = format!(
        "<h1>Sign in</h1>{error_html}\
         <form method=\"post\" action=\"/{auth_method_id}/login\">\
         <label>Username <input name=\"username\" value=\"{prefill}\" autofocus></label>\
         <label>Password <input name=\"password\" type=\"password\"></label>\
         <button type=\"submit\">Sign in</button></form>"
    );
    page("Sign in", &body)
}

fn register(auth_method_id: &str, view: &Value) -> String {
    let nonce = escape(str_field(view, "nonce"));
    let mut fields = String::new();
    if let Some(list) = view.get("fields").and_then(Value::as_array) {
        for field in list {
            let name = escape(str_field(field, "name"));
            let prefill = escape(str_field(field, "prefill"));
            let required = field
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let required_attr = if required { " required" } else { "" };
            fields.push_str(&format!(
                "<label>{name} <input name=\"{name}\" value=\"{prefill}\"{required_attr}></label>"
            ));
        }
    }
    let body = format!(
        "<h1>Complete your registration</h1>\
         <form method=\"post\" action=\"/{auth_method_id}/register\">\
         <input type=\"hidden\" name=\"nonce\" value=\"{nonce}\">\
         {fields}<button type=\"submit\">Register</button></form>"
    );
    page("Register", &body)
}

fn select_namespace(auth_method_id: &str, view: &Value) -> String {
    let nonce = escape(str_field(view, "nonce"));
    let mut options = String::new();
    if let Some(list) = view.get("namespaces").and_then(Value::as_array) {
        for ns in list.iter().filter_map(Value::as_str) {
            let ns = escape(ns);
            options.push_str(&format!("<option value=\"{ns}\">{ns}</option>"));
        }
    }
    let body = format!(
        "<h1>Choose an organization</h1>\
         <form method=\"post\" action=\"/{auth_method_id}/selectnamespace\">\
         <input type=\"hidden\" name=\"nonce\" value=\"{nonce}\">\
         <select name=\"namespace\">{options}</select>\
         <button type=\"submit\">Continue</button></form>"
    );
    page("Choose an organization", &body)
}

fn grant(auth_method_id: &str, view: &Value) -> String {
    let nonce = escape(str_field(view, "nonce"));
    let application = escape(str_field(view, "applicationName"));
    let mut scopes = String::new();
    if let Some(list) = view.get("missingGrants").and_then(Value::as_array) {
        for scope in list.iter().filter_map(Value::as_str) {
            scopes.push_str(&format!("<li>{}</li>", escape(scope)));
        }
    }
    let body = format!(
        "<h1>Authorize {application}</h1>\
         <p>The application requests access to:</p><ul>{scopes}</ul>\
         <form method=\"post\" action=\"/{auth_method_id}/grant\">\
         <input type=\"hidden\" name=\"nonce\" value=\"{nonce}\">\
         <button type=\"submit\" name=\"_action\" value=\"allow\">Allow</button>\
         <button type=\"submit\" name=\"_action\" value=\"deny\">Deny</button></form>"
    );
    page("Authorize", &body)
}
