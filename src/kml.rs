//! Loads waypoints from KML and KMZ path files.
use std::fmt;
use std::fs::{remove_dir_all, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::{error, io, result};

use crate::telemetry::{latitude_longitude_to_point, Point};

pub type Result<T> = result::Result<T, KmlError>;

#[derive(Debug)]
pub enum KmlError {
    Io(io::Error),
    /// The KMZ archive could not be unzipped.
    Unzip(String),
    /// No coordinates line was found in the document.
    MissingCoordinates,
}

impl fmt::Display for KmlError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KmlError::Io(err) => write!(formatter, "IO error: {}", err),
            KmlError::Unzip(message) => write!(formatter, "Unable to unzip file: {}", message),
            KmlError::MissingCoordinates => write!(formatter, "No coordinates line found"),
        }
    }
}

impl error::Error for KmlError {}

impl From<io::Error> for KmlError {
    fn from(err: io::Error) -> KmlError {
        KmlError::Io(err)
    }
}

/**
 * Loads the waypoints from a KML or KMZ path file. Relative file names are
 * resolved under the paths directory.
 */
pub fn waypoints_from_file_name(file_name: &str) -> Result<Vec<Point>> {
    let path = resolve_path(file_name);
    if path.extension().map(|e| e == "kmz").unwrap_or(false) {
        let doc_kml = extract_doc_kml(&path)?;
        load_waypoints(BufReader::new(File::open(&doc_kml)?))
    } else {
        load_waypoints(BufReader::new(File::open(&path)?))
    }
}

fn resolve_path(file_name: &str) -> PathBuf {
    let path = Path::new(file_name);
    if path.is_absolute() || file_name.starts_with("paths/") {
        path.to_path_buf()
    } else {
        Path::new("paths").join(path)
    }
}

/**
 * Unzips a KMZ archive and returns the path of the doc.kml inside. A KMZ
 * file is a zip archive containing a single file named doc.kml.
 */
fn extract_doc_kml(kmz_path: &Path) -> Result<PathBuf> {
    let temp_directory = "/tmp/waypoints";
    match remove_dir_all(temp_directory) {
        Ok(_) => (),
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => (),
        Err(err) => warn!("Failed to remove temp directory: {}", err),
    }

    let status = Command::new("unzip")
        .arg(kmz_path)
        .arg("-d") // Output directory
        .arg(temp_directory)
        .status()
        .map_err(|err| KmlError::Unzip(err.to_string()))?;
    if !status.success() {
        return Err(KmlError::Unzip(format!("unzip exited with {}", status)));
    }
    Ok(Path::new(temp_directory).join("doc.kml"))
}

/**
 * Loads and returns the waypoints from a KML document. We should use a real
 * XML parser here, but Google Earth saves the <coordinates> tag on one line,
 * then the coordinates on the next, so we just rely on that.
 */
fn load_waypoints<T: BufRead>(xml_file: T) -> Result<Vec<Point>> {
    let mut coordinates_open_tag = false;
    for line in xml_file.lines() {
        let line = line?;
        if line.contains("<coordinates>") {
            coordinates_open_tag = true;
        } else if coordinates_open_tag {
            return Ok(parse_coordinates_line(&line));
        }
    }
    Err(KmlError::MissingCoordinates)
}

/**
 * Parses waypoints from a coordinates line, e.g.
 * "-105.3,40.9,0 -105.2,41.1,0". Each triple is longitude, latitude and
 * altitude; altitude is ignored.
 */
fn parse_coordinates_line(line: &str) -> Vec<Point> {
    let mut waypoints = Vec::new();
    for long_lat_alt in line.split_whitespace() {
        let mut iterator = long_lat_alt.split(',');
        let longitude = iterator.next().and_then(|value| value.parse::<f64>().ok());
        let latitude = iterator.next().and_then(|value| value.parse::<f64>().ok());
        match (longitude, latitude) {
            (Some(longitude), Some(latitude)) => {
                waypoints.push(latitude_longitude_to_point(latitude, longitude));
            }
            _ => warn!("Unable to parse coordinate: '{}'", long_lat_alt),
        }
    }
    waypoints
}
