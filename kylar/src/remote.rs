use reqwest::blocking::Client;
use reqwest::header::RANGE;
use std::io::Read;
use url::Url;

use crate::index::{Index, OpenMode};
use crate::package::{self, PackageFile, PACKAGE_HEADER_SIZE};
use crate::packed;
use crate::repository::{ContentSink, ValidationSink};
use crate::{Error, HashSum};

/// A packed repository served over http(s). The index is downloaded once
/// into a temporary file and opened like a local one; package data is read
/// through ranged requests.
pub struct RemoteRepository {
    index: Index,
    base_url: Url,
    client: Client,
    // Keeps the downloaded index alive until the repository is dropped.
    _index_file: tempfile::NamedTempFile,
}

impl RemoteRepository {
    pub fn open(location: &str) -> Result<Self, Error> {
        let mut base_url = Url::parse(location)
            .map_err(|e| Error::InvalidArgument(format!("invalid repository url: {}", e)))?;
        // A trailing slash makes join() treat the location as a directory
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        let client = Client::new();

        let index_url = join_url(&base_url, "repository.db")?;
        let response = client.get(index_url).send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!(
                "no repository index at '{}'",
                location
            )));
        }
        let mut response = response.error_for_status()?;
        let mut index_file = tempfile::NamedTempFile::new()?;
        response.copy_to(index_file.as_file_mut())?;
        let index = Index::open(index_file.path(), OpenMode::Read)?;

        Ok(Self {
            index,
            base_url,
            client,
            _index_file: index_file,
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn open_package(&self, filename: &str) -> Result<Box<dyn PackageFile>, Error> {
        let url = join_url(&self.base_url, filename)?;
        let mut package = RemotePackageFile {
            client: self.client.clone(),
            url,
        };
        let mut header = [0u8; PACKAGE_HEADER_SIZE];
        package.read_at(0, &mut header)?;
        package::verify_header(&header)?;
        Ok(Box::new(package))
    }

    pub fn get_contents(
        &mut self,
        requested: &[HashSum],
        decryption_key: Option<&str>,
        sink: &mut ContentSink<'_>,
    ) -> Result<(), Error> {
        packed::fetch_contents(
            &self.index,
            requested,
            decryption_key,
            |filename| self.open_package(filename),
            sink,
        )
    }

    pub fn validate(
        &mut self,
        decryption_key: Option<&str>,
        sink: &mut ValidationSink<'_>,
    ) -> Result<(), Error> {
        packed::validate_chunks(
            &self.index,
            decryption_key,
            |filename| self.open_package(filename),
            sink,
        )
    }
}

fn join_url(base: &Url, name: &str) -> Result<Url, Error> {
    base.join(name)
        .map_err(|e| Error::InvalidArgument(format!("invalid package name '{}': {}", name, e)))
}

struct RemotePackageFile {
    client: Client,
    url: Url,
}

impl PackageFile for RemotePackageFile {
    /// Issue a ranged read; succeeding means the full buffer was filled.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Ok(());
        }
        let range = format!("bytes={}-{}", offset, offset + buf.len() as u64 - 1);
        let response = self.client.get(self.url.clone()).header(RANGE, range).send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!(
                "missing package file '{}'",
                self.url
            )));
        }
        let mut reader = response.error_for_status()?;
        let mut filled = 0;
        while filled < buf.len() {
            let read = reader.read(&mut buf[filled..]).map_err(Error::Io)?;
            if read == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "package data ended unexpectedly",
                )));
            }
            filled += read;
        }
        Ok(())
    }
}
