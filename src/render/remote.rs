use async_trait::async_trait;

use super::{BackendKind, ExportOutputs, RenderBackend, RenderError, RenderRequest, VideoInfo};

/// Hosted rendering service. Not available in this build.
#[derive(Debug, Default)]
pub struct RemoteBackend;

impl RemoteBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RenderBackend for RemoteBackend {
    async fn render(
        &self,
        _request: &RenderRequest,
        _outputs: Option<&mut ExportOutputs>,
    ) -> Result<VideoInfo, RenderError> {
        Err(RenderError::Unsupported(
            "remote rendering service integration is not built".to_string(),
        ))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }
}
