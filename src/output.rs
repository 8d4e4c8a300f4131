use crate::aggregate::{AggregateRecord, OutputCollection};
use crate::error::{RasterH3Error, Result};
use crate::grid::CellId;
use geojson::{feature, Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use log::info;
use serde_json::json;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

const CSV_HEADER: &str = "h3_index,value,count,longitude,latitude";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Feature collection with polygon or point geometry
    Geojson,
    /// Flat table with centroid columns
    Csv,
}

impl OutputFormat {
    /// Infer the format from the file extension; anything but `.csv` is GeoJSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => OutputFormat::Csv,
            _ => OutputFormat::Geojson,
        }
    }
}

fn record_feature(record: &AggregateRecord) -> Feature {
    let value = match &record.boundary {
        Some(polygon) => Value::from(polygon),
        None => Value::from(&record.centroid),
    };

    let mut properties = JsonObject::new();
    properties.insert("h3_index".to_string(), record.cell.to_string().into());
    properties.insert("value".to_string(), record.mean.into());
    properties.insert("count".to_string(), record.count.into());

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: Some(feature::Id::String(record.cell.to_string())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Build the GeoJSON document for a collection. The CRS is written as a
/// legacy named `crs` member alongside the H3 resolution.
pub fn to_geojson(collection: &OutputCollection) -> GeoJson {
    let features = collection.records.iter().map(record_feature).collect();

    let mut members = JsonObject::new();
    members.insert(
        "crs".to_string(),
        json!({ "type": "name", "properties": { "name": collection.crs } }),
    );
    members.insert("h3_resolution".to_string(), collection.level.into());

    GeoJson::from(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    })
}

pub fn write_geojson<W: Write>(collection: &OutputCollection, writer: W) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer(&mut writer, &to_geojson(collection))?;
    writer.flush()?;
    Ok(())
}

pub fn write_csv<W: Write>(collection: &OutputCollection, writer: W) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    writeln!(writer, "{}", CSV_HEADER)?;

    for r in &collection.records {
        writeln!(
            writer,
            "{},{},{},{},{}",
            r.cell,
            r.mean,
            r.count,
            r.centroid.x(),
            r.centroid.y()
        )?;
    }

    writer.flush()?;
    Ok(())
}

/// One parsed row of the tabular output.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub cell: CellId,
    pub mean: f64,
    pub count: u64,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

fn malformed(line: usize, reason: impl ToString) -> RasterH3Error {
    RasterH3Error::MalformedTable {
        line,
        reason: reason.to_string(),
    }
}

/// Parse tabular output back into rows. Centroid columns are optional.
pub fn read_table<R: BufRead>(reader: R) -> Result<Vec<TableRow>> {
    let mut lines = reader.lines().enumerate();

    match lines.next() {
        Some((_, header)) => {
            let header = header?;
            if !header.trim().starts_with("h3_index,value,count") {
                return Err(malformed(1, format!("unexpected header '{}'", header)));
            }
        }
        None => return Err(malformed(1, "missing header")),
    }

    let mut rows = Vec::new();
    for (idx, line) in lines {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 3 && fields.len() != 5 {
            return Err(malformed(
                line_no,
                format!("expected 3 or 5 fields, found {}", fields.len()),
            ));
        }

        let cell = fields[0]
            .parse::<CellId>()
            .map_err(|e| malformed(line_no, format!("bad cell id '{}': {}", fields[0], e)))?;
        let mean = fields[1]
            .parse::<f64>()
            .map_err(|e| malformed(line_no, format!("bad value '{}': {}", fields[1], e)))?;
        let count = fields[2]
            .parse::<u64>()
            .map_err(|e| malformed(line_no, format!("bad count '{}': {}", fields[2], e)))?;

        let coordinate = |i: usize| -> Result<Option<f64>> {
            match fields.get(i) {
                Some(text) => text
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|e| malformed(line_no, format!("bad coordinate '{}': {}", text, e))),
                None => Ok(None),
            }
        };

        rows.push(TableRow {
            cell,
            mean,
            count,
            longitude: coordinate(3)?,
            latitude: coordinate(4)?,
        });
    }

    Ok(rows)
}

/// Write the collection to `path`. The document is written to a temporary
/// file in the same directory and renamed into place, so a failed run never
/// leaves a partial output file.
pub fn write_output(collection: &OutputCollection, path: &Path, format: OutputFormat) -> Result<()> {
    info!("Writing {:?} output: {}", format, path.display());

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;

    match format {
        OutputFormat::Geojson => write_geojson(collection, temp.as_file_mut())?,
        OutputFormat::Csv => write_csv(collection, temp.as_file_mut())?,
    }

    temp.persist(path).map_err(|e| RasterH3Error::Io(e.error))?;

    info!(
        "Successfully wrote {} H3 cells to output",
        collection.records.len()
    );
    Ok(())
}
