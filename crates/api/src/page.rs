//! Server-rendered form page.

use plancheck_core::credential::{CREDENTIAL_CONFIGURED_MESSAGE, CREDENTIAL_MISSING_WARNING};
use plancheck_core::{
    InputMethod, ModelChoice, PolicyProfile, DEFAULT_MAX_LENGTH, DEFAULT_TEMPERATURE,
    DEFAULT_TOP_P, MAX_LENGTH_MAX, MAX_LENGTH_MIN, TEMPERATURE_MAX, TEMPERATURE_MIN, TOP_P_MAX,
    TOP_P_MIN,
};

pub const CHECK_BUTTON_LABEL: &str = "Check this plan (click once and wait)";

/// Escape HTML special characters for safe rendering.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render_form(profile: &PolicyProfile, credential_configured: bool) -> String {
    let title = html_escape(&profile.title);

    let links = profile
        .links
        .iter()
        .map(|link| {
            format!(
                r#"<li><a href="{}" target="_blank" rel="noopener">{}</a></li>"#,
                html_escape(&link.url),
                html_escape(&link.label)
            )
        })
        .collect::<String>();

    let contact = profile
        .contact_email
        .as_deref()
        .map(|email| {
            format!(
                r#"<p class="contact"><a href="mailto:{0}">{0}</a></p>"#,
                html_escape(email)
            )
        })
        .unwrap_or_default();

    let credential_block = if credential_configured {
        format!(r#"<p class="status ok">{CREDENTIAL_CONFIGURED_MESSAGE}</p>"#)
    } else {
        format!(
            r#"<label for="api-token">Enter Replicate API token:</label>
            <input type="password" id="api-token" autocomplete="off">
            <p id="credential-status" class="status warn">{CREDENTIAL_MISSING_WARNING}</p>"#
        )
    };

    let model_options = ModelChoice::ALL
        .iter()
        .map(|model| {
            let selected = if *model == ModelChoice::default() {
                " selected"
            } else {
                ""
            };
            format!(
                r#"<option value="{0}"{1}>{0}</option>"#,
                model.label(),
                selected
            )
        })
        .collect::<String>();

    let input_methods = [InputMethod::Upload, InputMethod::Paste]
        .iter()
        .map(|method| {
            let checked = if *method == InputMethod::default() {
                " checked"
            } else {
                ""
            };
            let value = match method {
                InputMethod::Upload => "upload",
                InputMethod::Paste => "paste",
            };
            format!(
                r#"<label><input type="radio" name="input-method" value="{value}"{checked}> {}</label>"#,
                method.label()
            )
        })
        .collect::<String>();

    let (upload_hidden, paste_hidden) = match InputMethod::default() {
        InputMethod::Upload => ("", " hidden"),
        InputMethod::Paste => (" hidden", ""),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
<aside>
    <h2>Models and parameters</h2>
    {credential_block}
    <label for="model">Choose a model</label>
    <select id="model">{model_options}</select>
    <label for="temperature">temperature <output id="temperature-value">{DEFAULT_TEMPERATURE}</output></label>
    <input type="range" id="temperature" min="{TEMPERATURE_MIN}" max="{TEMPERATURE_MAX}" step="0.01" value="{DEFAULT_TEMPERATURE}">
    <label for="top-p">top_p <output id="top-p-value">{DEFAULT_TOP_P}</output></label>
    <input type="range" id="top-p" min="{TOP_P_MIN}" max="{TOP_P_MAX}" step="0.01" value="{DEFAULT_TOP_P}">
    <label for="max-length">max_length <output id="max-length-value">{DEFAULT_MAX_LENGTH}</output></label>
    <input type="range" id="max-length" min="{MAX_LENGTH_MIN}" max="{MAX_LENGTH_MAX}" step="8" value="{DEFAULT_MAX_LENGTH}">
    <ul class="links">{links}</ul>
</aside>
<main>
    <h1>{title}</h1>
    <fieldset>
        <legend>Select input method</legend>
        {input_methods}
    </fieldset>
    <div id="upload-input"{upload_hidden}>
        <label for="plan-file">Upload a plan to check</label>
        <input type="file" id="plan-file" accept=".txt,.pdf,.doc,.docx">
    </div>
    <div id="paste-input"{paste_hidden}>
        <label for="plan-text">Paste the text of your plan to check</label>
        <textarea id="plan-text" rows="10"></textarea>
    </div>
    <button id="check">{CHECK_BUTTON_LABEL}</button>
    <p id="error" class="status warn" hidden></p>
    <div id="answer"></div>
    {contact}
</main>
<script>{SCRIPT}</script>
</body>
</html>"#
    )
}

const STYLE: &str = r#"
body { display: flex; margin: 0; font-family: system-ui, sans-serif; color: #1f2933; }
aside { width: 18rem; padding: 1.5rem; background: #f0f2f6; min-height: 100vh; }
aside label, aside select, aside input { display: block; width: 100%; margin-top: 0.5rem; }
main { flex: 1; padding: 2rem 3rem; max-width: 50rem; }
textarea { width: 100%; font: inherit; }
button { margin-top: 1rem; padding: 0.5rem 1rem; }
.status.ok { color: #1b7f3b; }
.status.warn { color: #a15c00; }
#answer { margin-top: 1.5rem; white-space: pre-wrap; }
"#;

const SCRIPT: &str = r#"
const byId = (id) => document.getElementById(id);

for (const [slider, label] of [["temperature", "temperature-value"], ["top-p", "top-p-value"], ["max-length", "max-length-value"]]) {
  byId(slider).addEventListener("input", () => { byId(label).textContent = byId(slider).value; });
}

for (const radio of document.querySelectorAll("input[name=input-method]")) {
  radio.addEventListener("change", () => {
    const upload = radio.value === "upload" && radio.checked;
    byId("upload-input").hidden = !upload;
    byId("paste-input").hidden = upload;
  });
}

const tokenInput = byId("api-token");
if (tokenInput) {
  tokenInput.addEventListener("input", async () => {
    const response = await fetch("/v1/credential/validate", {
      method: "POST",
      headers: { "content-type": "application/json" },
      body: JSON.stringify({ api_token: tokenInput.value }),
    });
    const payload = await response.json();
    const status = byId("credential-status");
    status.textContent = payload.message;
    status.className = payload.valid ? "status ok" : "status warn";
  });
}

function showError(message) {
  byId("answer").textContent = "";
  byId("error").textContent = message;
  byId("error").hidden = false;
}

async function readEvents(response, onEvent) {
  const reader = response.body.getReader();
  const decoder = new TextDecoder();
  let buffer = "";
  for (;;) {
    const { value, done } = await reader.read();
    if (done) break;
    buffer += decoder.decode(value, { stream: true });
    let split;
    while ((split = buffer.indexOf("\n\n")) >= 0) {
      const block = buffer.slice(0, split);
      buffer = buffer.slice(split + 2);
      let name = "message";
      const data = [];
      for (const line of block.split("\n")) {
        if (line.startsWith("event:")) name = line.slice(6).trim();
        else if (line.startsWith("data:")) data.push(line.slice(5).replace(/^ /, ""));
      }
      if (data.length) onEvent(name, JSON.parse(data.join("\n")));
    }
  }
}

byId("check").addEventListener("click", async () => {
  const button = byId("check");
  const method = document.querySelector("input[name=input-method]:checked").value;
  const params = {
    model: byId("model").value,
    temperature: Number(byId("temperature").value),
    top_p: Number(byId("top-p").value),
    max_length: Number(byId("max-length").value),
  };
  const headers = { "x-session-id": sessionStorage.getItem("plancheck-session") || crypto.randomUUID() };
  sessionStorage.setItem("plancheck-session", headers["x-session-id"]);
  if (tokenInput) headers["x-replicate-token"] = tokenInput.value;

  let request;
  if (method === "upload") {
    const file = byId("plan-file").files[0];
    if (!file) { showError("Choose a file to upload first."); return; }
    const query = new URLSearchParams({ ...params, file_name: file.name });
    request = fetch(`/v1/check/upload?${query}`, { method: "POST", headers, body: file });
  } else {
    headers["content-type"] = "application/json";
    request = fetch("/v1/check", {
      method: "POST",
      headers,
      body: JSON.stringify({ ...params, input_method: "paste", text: byId("plan-text").value }),
    });
  }

  button.disabled = true;
  byId("error").hidden = true;
  byId("answer").textContent = "";
  try {
    const response = await request;
    if (!response.ok) {
      const payload = await response.json();
      showError(payload.warning || payload.message || payload.error);
      return;
    }
    let answer = "";
    await readEvents(response, (name, payload) => {
      if (name === "fragment") { answer += payload.text; byId("answer").textContent = answer; }
      else if (name === "answer") { byId("answer").textContent = payload.text; }
      else if (name === "error") { showError(payload.message); }
    });
  } catch (error) {
    showError(String(error));
  } finally {
    button.disabled = false;
  }
});
"#;
