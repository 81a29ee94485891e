//! Builders and fixtures for annotated resources.

#![allow(dead_code)]

use promconf::Resource;

use super::harness::{INSTANCE_ID, INSTANCE_KEY};

pub const PREFIX: &str = "prometheus.net/";

pub const VALID_RULE: &str = "- name: node\n  rules:\n  - alert: NodeDown\n    expr: up{job=\"node\"} == 0\n    for: 5m\n    labels:\n      severity: page\n";

pub const RECORDING_RULE: &str = "groups:\n- name: rollups\n  rules:\n  - record: job:up:sum\n    expr: sum by (job) (up)\n";

pub const INVALID_RULE: &str = "- name: [broken\n";

pub const TEMPLATE: &str = "global:\n  scrape_interval: 15s\nscrape_configs:\n{{ .Jobs }}";

pub fn job_fragment(job_name: &str) -> String {
    format!(
        "- job_name: {}\n  static_configs:\n  - targets: ['{}:9100']",
        job_name, job_name
    )
}

pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            resource: Resource::new("monitoring", name),
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.resource.namespace = namespace.to_string();
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.resource
            .annotations
            .insert(format!("{}{}", PREFIX, key), value.to_string());
        self
    }

    pub fn id(self, id: &str) -> Self {
        self.annotation("id", id)
    }

    pub fn owned(self) -> Self {
        self.id(INSTANCE_ID)
    }

    pub fn rule(self) -> Self {
        self.annotation("rule", "true")
    }

    pub fn job(self) -> Self {
        self.annotation("job", "true")
    }

    pub fn config(self) -> Self {
        self.annotation("config", "true")
    }

    pub fn key(self, key: &str) -> Self {
        self.annotation("key", key)
    }

    pub fn authorized(self) -> Self {
        self.key(INSTANCE_KEY)
    }

    pub fn data(mut self, key: &str, value: &str) -> Self {
        self.resource.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Resource {
        self.resource
    }
}

pub fn owned_rules(name: &str, data: &[(&str, &str)]) -> Resource {
    data.iter()
        .fold(ResourceBuilder::new(name).owned().rule(), |b, (k, v)| b.data(k, v))
        .build()
}

pub fn owned_jobs(name: &str, data: &[(&str, &str)]) -> Resource {
    data.iter()
        .fold(ResourceBuilder::new(name).owned().job(), |b, (k, v)| b.data(k, v))
        .build()
}

pub fn authorized_template(name: &str, template: &str) -> Resource {
    ResourceBuilder::new(name)
        .owned()
        .config()
        .authorized()
        .data("prometheus.yml.tmpl", template)
        .build()
}
