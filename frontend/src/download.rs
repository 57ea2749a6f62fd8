//! Saving generated files.
//!
//! On the web the bytes go through a Blob and a temporary object URL that a
//! hidden anchor downloads. Natively they are written into a directory.

pub const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("Could not save file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not save file: {0}")]
    Browser(String),
}

pub trait FileSaver {
    fn save(&self, bytes: &[u8], file_name: &str) -> Result<(), SaveError>;
}

/// Creates and releases temporary object URLs.
pub trait ObjectUrlRegistry {
    fn create(&self, bytes: &[u8], mime: &str) -> Result<String, SaveError>;
    fn revoke(&self, url: &str);
}

/// An object URL that is revoked when dropped.
pub struct ObjectUrl<'a, R: ObjectUrlRegistry + ?Sized> {
    registry: &'a R,
    url: String,
}

impl<'a, R: ObjectUrlRegistry + ?Sized> ObjectUrl<'a, R> {
    pub fn acquire(registry: &'a R, bytes: &[u8], mime: &str) -> Result<Self, SaveError> {
        let url = registry.create(bytes, mime)?;
        Ok(Self { registry, url })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl<R: ObjectUrlRegistry + ?Sized> Drop for ObjectUrl<'_, R> {
    fn drop(&mut self) {
        self.registry.revoke(&self.url);
    }
}

/// Exposes `bytes` under a temporary URL, hands it to `activate` together
/// with `file_name`, and revokes the URL afterwards whether or not
/// activation succeeded.
pub fn save_via_object_url<R, A>(
    registry: &R,
    activate: A,
    bytes: &[u8],
    file_name: &str,
) -> Result<(), SaveError>
where
    R: ObjectUrlRegistry + ?Sized,
    A: FnOnce(&str, &str) -> Result<(), SaveError>,
{
    let url = ObjectUrl::acquire(registry, bytes, PPTX_MIME)?;
    activate(url.as_str(), file_name)
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::DirectorySaver;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::{FileSaver, SaveError};
    use std::fs::OpenOptions;
    use std::io::{self, Write};
    use std::path::{Path, PathBuf};

    /// Writes files into a fixed directory. An existing file is never
    /// replaced; the new one gets a ` (n)` suffix the way browsers do.
    #[derive(Debug, Clone)]
    pub struct DirectorySaver {
        dir: PathBuf,
    }

    impl DirectorySaver {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        pub fn dir(&self) -> &Path {
            &self.dir
        }

        /// Creates the first free `name`, `name (1)`, `name (2)`, ... and
        /// writes `bytes` into it.
        pub fn write_unique(&self, bytes: &[u8], file_name: &str) -> Result<PathBuf, SaveError> {
            std::fs::create_dir_all(&self.dir)?;
            let mut attempt = 0;
            loop {
                let path = self.dir.join(numbered_name(file_name, attempt));
                match OpenOptions::new().write(true).create_new(true).open(&path) {
                    Ok(mut file) => {
                        file.write_all(bytes)?;
                        return Ok(path);
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    fn numbered_name(file_name: &str, attempt: u32) -> String {
        if attempt == 0 {
            return file_name.to_string();
        }
        let name = Path::new(file_name);
        let stem = name
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.extension() {
            Some(ext) => format!("{} ({}).{}", stem, attempt, ext.to_string_lossy()),
            None => format!("{} ({})", stem, attempt),
        }
    }

    impl FileSaver for DirectorySaver {
        fn save(&self, bytes: &[u8], file_name: &str) -> Result<(), SaveError> {
            let path = self.write_unique(bytes, file_name)?;
            log::info!("Saved {} bytes to {:?}", bytes.len(), path);
            Ok(())
        }
    }

}

#[cfg(target_arch = "wasm32")]
pub use web::BrowserSaver;

#[cfg(target_arch = "wasm32")]
mod web {
    use super::{save_via_object_url, FileSaver, ObjectUrlRegistry, SaveError};
    use wasm_bindgen::JsCast;
    use web_sys::{Blob, BlobPropertyBag, HtmlAnchorElement, Url};

    fn js_err(context: &str, err: wasm_bindgen::JsValue) -> SaveError {
        SaveError::Browser(format!("{}: {:?}", context, err))
    }

    struct BlobUrls;

    impl ObjectUrlRegistry for BlobUrls {
        fn create(&self, bytes: &[u8], mime: &str) -> Result<String, SaveError> {
            let array = js_sys::Array::new();
            array.push(&js_sys::Uint8Array::from(bytes));

            let properties = BlobPropertyBag::new();
            properties.set_type(mime);

            let blob = Blob::new_with_u8_array_sequence_and_options(&array, &properties)
                .map_err(|e| js_err("Failed to create blob", e))?;
            Url::create_object_url_with_blob(&blob)
                .map_err(|e| js_err("Failed to create object URL", e))
        }

        fn revoke(&self, url: &str) {
            if let Err(e) = Url::revoke_object_url(url) {
                log::warn!("Failed to revoke object URL: {:?}", e);
            }
        }
    }

    fn click_hidden_anchor(href: &str, file_name: &str) -> Result<(), SaveError> {
        let document = web_sys::window()
            .and_then(|window| window.document())
            .ok_or_else(|| SaveError::Browser("No document object".to_string()))?;
        let body = document
            .body()
            .ok_or_else(|| SaveError::Browser("No body element".to_string()))?;

        let anchor = document
            .create_element("a")
            .map_err(|e| js_err("Failed to create anchor", e))?
            .dyn_into::<HtmlAnchorElement>()
            .map_err(|_| SaveError::Browser("Failed to cast to anchor".to_string()))?;

        anchor.set_href(href);
        anchor.set_download(file_name);
        anchor
            .style()
            .set_property("display", "none")
            .map_err(|e| js_err("Failed to set style", e))?;

        body.append_child(&anchor)
            .map_err(|e| js_err("Failed to append anchor", e))?;
        anchor.click();
        body.remove_child(&anchor)
            .map_err(|e| js_err("Failed to remove anchor", e))?;

        log::info!("Triggered download for {}", file_name);
        Ok(())
    }

    /// Triggers a browser download through a temporary object URL.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct BrowserSaver;

    impl FileSaver for BrowserSaver {
        fn save(&self, bytes: &[u8], file_name: &str) -> Result<(), SaveError> {
            save_via_object_url(&BlobUrls, click_hidden_anchor, bytes, file_name)
        }
    }
}
