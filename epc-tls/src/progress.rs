// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Progress reporting for slow credential generation

/// Receives progress of long-running credential operations
///
/// Key generation may take a while on constrained hosts; a user interface can
/// show a progress indicator through this contract.
pub trait ProgressHooks: Send + Sync {
    /// An operation titled `title` starts
    fn begin(&self, title: &str) -> Box<dyn ProgressTask>;
}

/// One running operation started by [`ProgressHooks::begin`]
pub trait ProgressTask: Send {
    /// `fraction` in `0.0..=1.0`, or `None` when progress is indeterminate
    fn update(&mut self, fraction: Option<f64>, message: &str);

    /// The operation finished
    fn end(self: Box<Self>);
}

/// Hooks that report progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

struct LogTask {
    title: String,
}

impl ProgressHooks for LogProgress {
    fn begin(&self, title: &str) -> Box<dyn ProgressTask> {
        tracing::info!("{title}");
        Box::new(LogTask {
            title: title.to_string(),
        })
    }
}

impl ProgressTask for LogTask {
    fn update(&mut self, fraction: Option<f64>, message: &str) {
        match fraction {
            Some(fraction) => tracing::debug!("{}: {message} ({:.0}%)", self.title, fraction * 100.0),
            None => tracing::debug!("{}: {message}", self.title),
        }
    }

    fn end(self: Box<Self>) {
        tracing::debug!("{}: done", self.title);
    }
}
