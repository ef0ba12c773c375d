use chrono::Local;
use serde::{Deserialize, Serialize};

/// Identity of the crawl job whose telemetry is being forwarded
///
/// Every payload sent to the backend carries these four fields so the backend
/// can attribute stats, error rates, and error records to a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Machine the crawler runs on
    pub host: String,
    /// Project the spider belongs to
    pub project: String,
    /// Spider name
    pub spider: String,
    /// Unique id of this run
    pub job_id: String,
}

impl JobInfo {
    /// Create a job identity on the current machine
    pub fn new(
        project: impl Into<String>,
        spider: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            host: local_hostname(),
            project: project.into(),
            spider: spider.into(),
            job_id: job_id.into(),
        }
    }

    /// Build the job identity from the variables a scrapyd-style launcher sets
    ///
    /// `SCRAPY_PROJECT` defaults to `default`; without `SCRAPY_JOB` a job id is
    /// generated from the spider name and the local start time.
    pub fn from_env(spider: impl Into<String>) -> Self {
        Self::from_lookup(spider, |name| std::env::var(name).ok())
    }

    /// Same as [`JobInfo::from_env`] with an arbitrary variable lookup
    pub fn from_lookup<F>(spider: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let spider = spider.into();
        let project = lookup("SCRAPY_PROJECT").unwrap_or_else(|| "default".to_string());
        let job_id = lookup("SCRAPY_JOB").unwrap_or_else(|| generated_job_id(&spider));
        Self::new(project, spider, job_id)
    }

    /// Replace the detected host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

fn generated_job_id(spider: &str) -> String {
    format!("{}-{}", spider, Local::now().format("%Y%m%dT%H%M%S"))
}

/// Hostname of this machine, `localhost` if it cannot be determined
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes and gethostname writes at most that many.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match std::str::from_utf8(&buf[..len]) {
        Ok(name) if !name.is_empty() => name.to_string(),
        _ => "localhost".to_string(),
    }
}
