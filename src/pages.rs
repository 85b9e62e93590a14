//! HTML rendering for the three pages.
//!
//! Plain `format!` templates; every user-supplied value goes through
//! [`escape_html`] before it is interpolated.

use axum::response::Html;

use crate::problem::ProblemView;
use crate::profile::{FieldState, ProfileForm};
use crate::validate::escape_html;

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<link rel="stylesheet" href="/style.css">
</head>
<body>
<main>
<h1>{title}</h1>
{body}
</main>
</body>
</html>
"#,
        title = escape_html(title),
        body = body,
    ))
}

fn error_block(error: Option<&str>) -> String {
    match error {
        Some(msg) => format!("<p class=\"error\">{}</p>\n", escape_html(msg)),
        None => String::new(),
    }
}

pub fn login_email(error: Option<&str>, email: &str) -> Html<String> {
    let body = format!(
        r#"{error}<form method="post" action="/login">
<label>Email address <input type="email" name="email" value="{email}" autofocus></label>
<button type="submit">Send confirmation code</button>
</form>
"#,
        error = error_block(error),
        email = escape_html(email),
    );
    layout("Log in", &body)
}

pub fn login_confirm(email: &str, error: Option<&str>) -> Html<String> {
    let body = format!(
        r#"{error}<p>A confirmation code was sent to <strong>{email}</strong>.</p>
<form method="post" action="/login">
<label>Confirmation code <input type="text" name="confirm" autocomplete="one-time-code" autofocus></label>
<button type="submit">Confirm</button>
</form>
<form method="post" action="/login">
<label>Use a different address <input type="email" name="email" value=""></label>
<button type="submit">Restart</button>
</form>
"#,
        error = error_block(error),
        email = escape_html(email),
    );
    layout("Confirm your email", &body)
}

fn text_input(label: &str, name: &str, field: &FieldState) -> String {
    let error = field
        .error
        .as_deref()
        .map(|e| format!(" <span class=\"error\">{} {}</span>", escape_html(label), escape_html(e)))
        .unwrap_or_default();
    format!(
        "<p><label>{label} <input type=\"text\" name=\"{name}\" value=\"{value}\"></label>{error}</p>\n",
        label = escape_html(label),
        name = name,
        value = escape_html(&field.value),
        error = error,
    )
}

pub fn profile(form: &ProfileForm, first_time: bool) -> Html<String> {
    let mut body = String::new();
    if first_time {
        body.push_str("<p>Welcome! Please tell us a little about yourself.</p>\n");
    }
    body.push_str(&error_block(form.error.as_deref()));
    body.push_str("<form method=\"post\" action=\"/profile-edit\">\n");
    body.push_str(&text_input("Full name", "full_name", &form.full_name));
    body.push_str(&text_input("Organization", "organization", &form.organization));
    body.push_str(&text_input("Location", "location", &form.location));

    body.push_str("<fieldset><legend>Email addresses</legend>\n");
    for (i, email) in form.emails.iter().enumerate() {
        let error = email
            .error
            .as_deref()
            .map(|e| format!(" <span class=\"error\">{}</span>", escape_html(e)))
            .unwrap_or_default();
        body.push_str(&format!(
            "<p><input type=\"text\" name=\"email{i}\" value=\"{value}\"> \
             <label><input type=\"checkbox\" name=\"delete{i}\"> delete</label>{error}</p>\n",
            i = i,
            value = escape_html(&email.value),
            error = error,
        ));
    }
    body.push_str(&format!(
        "<p><input type=\"text\" name=\"email{}\" value=\"\" placeholder=\"add another address\"></p>\n",
        form.emails.len()
    ));
    body.push_str("</fieldset>\n");
    body.push_str("<button type=\"submit\" name=\"submit\" value=\"Update\">Update</button>\n");
    body.push_str("</form>\n");

    layout("Profile", &body)
}

pub fn problems(view: &ProblemView, email: &str) -> Html<String> {
    let mut body = format!(
        "<p class=\"whoami\">Logged in as {} &middot; <a href=\"/profile-edit\">profile</a> &middot; <a href=\"/logout\">log out</a></p>\n",
        escape_html(email)
    );
    for notice in &view.notices {
        body.push_str(&format!("<p class=\"notice\">{}</p>\n", escape_html(notice)));
    }
    for error in &view.errors {
        body.push_str(&error_block(Some(error)));
    }

    body.push_str("<form method=\"post\" action=\"/problem\" enctype=\"multipart/form-data\">\n");
    if view.problems.is_empty() {
        body.push_str("<p>You have no problems yet.</p>\n");
    } else {
        body.push_str("<p><select name=\"problem\">\n");
        for name in &view.problems {
            let selected = if view.selected.as_deref() == Some(name.as_str()) {
                " selected"
            } else {
                ""
            };
            let name = escape_html(name);
            body.push_str(&format!(
                "<option value=\"{name}\"{selected}>{name}</option>\n"
            ));
        }
        body.push_str("</select> <button type=\"submit\" name=\"goto_problem\" value=\"1\">Go</button></p>\n");
    }
    body.push_str(
        "<p><label>New problem <input type=\"text\" name=\"new_problem\" pattern=\"[A-Za-z0-9_-]+\"></label> \
         <button type=\"submit\">Create</button></p>\n",
    );
    body.push_str(
        "<p><input type=\"file\" name=\"file\"> \
         <button type=\"submit\" name=\"upload\" value=\"1\">Upload</button></p>\n",
    );
    body.push_str("</form>\n");

    if let Some((record, data)) = &view.upload {
        body.push_str(&format!(
            "<h2>{}</h2>\n<pre>{}</pre>\n",
            escape_html(&record.original_name),
            escape_html(&String::from_utf8_lossy(data))
        ));
    }

    layout("Problems", &body)
}
