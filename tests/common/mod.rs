#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ballista::cmd::{CommandRunner, Invocation};
use ballista::error::{DeployError, DeployResult};
use ballista::{Infrastructure, Instance, StaticAddress};

pub const COMPOSE: &str = "\
services:
  backend:
    build: ./backend
    ports:
      - \"8000:8000\"
  db:
    image: postgres:16
";

pub const PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHb me@laptop\n";

pub const SCANNED_KEYS: &str = "# 34.1.2.3:22 SSH-2.0-OpenSSH_9.2\n\
                                |1|aGFzaA==|c2FsdA== ssh-ed25519 AAAAC3Nz\n";

type Response = Result<String, Option<i32>>;

struct Rule {
    pattern: String,
    responses: VecDeque<Response>,
}

/// A [`CommandRunner`] that records every invocation and answers
/// from scripted responses instead of running anything.
///
/// Responses are matched on a substring of the rendered command
/// line. Several responses for one pattern are served in order, the
/// last one repeating. Unmatched commands succeed with empty output.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    calls: Rc<RefCell<Vec<Invocation>>>,
    rules: Rc<RefCell<Vec<Rule>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, output: &str) -> &Self {
        self.push(pattern, Ok(output.to_string()));
        self
    }

    pub fn fail(&self, pattern: &str) -> &Self {
        self.push(pattern, Err(Some(1)));
        self
    }

    fn push(&self, pattern: &str, response: Response) {
        let mut rules = self.rules.borrow_mut();
        match rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(rule) => rule.responses.push_back(response),
            None => rules.push(Rule {
                pattern: pattern.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Rendered command lines, in execution order.
    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.program.clone()).collect()
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.contains(needle))
            .collect()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    fn answer(&self, invocation: &Invocation) -> DeployResult<String> {
        self.calls.borrow_mut().push(invocation.clone());
        let line = invocation.to_string();

        let mut rules = self.rules.borrow_mut();
        let Some(rule) = rules.iter_mut().find(|r| line.contains(&r.pattern)) else {
            return Ok(String::new());
        };
        let response = if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        };
        match response {
            Some(Ok(output)) => Ok(output),
            Some(Err(code)) => Err(DeployError::CommandFailed {
                command: line,
                code,
            }),
            None => Ok(String::new()),
        }
    }
}

impl CommandRunner for RecordingRunner {
    fn capture(&self, invocation: &Invocation) -> DeployResult<String> {
        self.answer(invocation)
    }

    fn interactive(&self, invocation: &Invocation) -> DeployResult<()> {
        self.answer(invocation).map(|_| ())
    }
}

pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// `my-vm` with SSH, HTTP and HTTPS rules, key and startup script
/// written under `dir`.
pub fn web_server(dir: &Path) -> Infrastructure {
    let key = write(dir, "id_ed25519.pub", PUBLIC_KEY);
    let script = write(dir, "startup.sh", "#!/bin/bash\necho hello\n");
    Infrastructure::web_server(
        "default",
        StaticAddress::new("backend-ip", "europe-west1"),
        Instance::new("my-vm", "deploy", &key, &script),
    )
}

pub fn address_listing(ip: &str) -> String {
    format!(r#"[{{"name": "backend-ip", "address": "{ip}", "status": "RESERVED"}}]"#)
}
