use kube::ResourceExt;

use super::{child_meta, labels};
use crate::{
    config::OperatorConfig,
    crd::{Application, ApplicationSpec},
    error::{Error, Result},
    external::kpack::{BlobSourceConfig, BuilderRef, GitSourceConfig, Image, ImageSpec, SourceConfig},
};

const DEFAULT_REVISION: &str = "main";

/// The literal image, when one is set.
pub fn literal_image(spec: &ApplicationSpec) -> Option<&str> {
    spec.image.as_deref().map(str::trim).filter(|i| !i.is_empty())
}

/// Build source for kpack: git wins over blob; `None` when neither has a URL.
pub fn build_source(spec: &ApplicationSpec) -> Option<SourceConfig> {
    if let Some(git) = spec.git.as_ref().filter(|g| !g.url.trim().is_empty()) {
        let revision = if git.revision.trim().is_empty() { DEFAULT_REVISION.to_string() } else { git.revision.clone() };
        return Some(SourceConfig { git: Some(GitSourceConfig { url: git.url.clone(), revision }), blob: None });
    }
    spec.blob
        .as_ref()
        .filter(|b| !b.url.trim().is_empty())
        .map(|b| SourceConfig { git: None, blob: Some(BlobSourceConfig { url: b.url.clone() }) })
}

pub fn image_tag(config: &OperatorConfig, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", config.registry_prefix, namespace, name)
}

pub fn image_build(app: &Application, config: &OperatorConfig, source: SourceConfig) -> Result<Image> {
    let name = app.name_any();
    let namespace = app.namespace().ok_or(Error::MissingField("metadata.namespace"))?;
    Ok(Image {
        metadata: child_meta(app, name.clone(), labels(&name))?,
        spec: ImageSpec {
            tag: image_tag(config, &namespace, &name),
            builder: BuilderRef { kind: "ClusterBuilder".into(), name: config.builder_name.clone() },
            service_account_name: None,
            source,
        },
        status: None,
    })
}
