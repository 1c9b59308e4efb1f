/// Single-band GeoTIFF reading and writing on top of the `tiff` crate.
///
/// Georeferencing uses the three baseline GeoTIFF tags (pixel scale, tie
/// point, GeoKey directory) plus GDAL's no-data tag. Only north-up rasters
/// with an EPSG-coded CRS are supported, which is what the upstream datasets
/// and every raster written here use.
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use suitability_core::{Crs, GeoTransform, Grid, RasterLayer, NODATA};

// ── Tags and keys ─────────────────────────────────────────────────────────────

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

// ── Reading ───────────────────────────────────────────────────────────────────

/// Read band 1 of a GeoTIFF. Cells equal to the declared no-data value
/// become NaN.
pub fn read_raster(path: &Path) -> Result<RasterLayer> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("Not a valid TIFF: {}", path.display()))?;

    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        bail!("Zero-sized TIFF: {}", path.display());
    }

    let transform = read_transform(&mut decoder).with_context(|| format!("No georeferencing in {}", path.display()))?;
    let crs = read_crs(&mut decoder).with_context(|| format!("No EPSG code in {}", path.display()))?;
    let nodata = read_nodata(&mut decoder)?;

    let mut data = to_f32(decoder.read_image().with_context(|| format!("read_image failed: {}", path.display()))?)?;
    if data.len() != width * height {
        bail!(
            "{}: expected {} samples for a {}x{} single-band image, got {}",
            path.display(),
            width * height,
            width,
            height,
            data.len()
        );
    }
    if let Some(nd) = nodata {
        for v in data.iter_mut().filter(|v| **v == nd) {
            *v = f32::NAN;
        }
    }

    Ok(RasterLayer::from_data(Grid { width, height, transform, crs }, data))
}

fn read_transform(decoder: &mut Decoder<BufReader<File>>) -> Result<GeoTransform> {
    let scale = decoder
        .find_tag(tag(MODEL_PIXEL_SCALE))?
        .context("missing ModelPixelScale tag")?
        .into_f64_vec()?;
    let tie = decoder
        .find_tag(tag(MODEL_TIEPOINT))?
        .context("missing ModelTiepoint tag")?
        .into_f64_vec()?;
    if scale.len() < 2 || tie.len() < 6 {
        bail!("malformed pixel scale / tie point tags");
    }
    let (sx, sy) = (scale[0], scale[1]);
    // Tie point (i, j, k) → (x, y, z).
    let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
    Ok(GeoTransform::new(x - i * sx, y + j * sy, sx, -sy))
}

fn read_crs(decoder: &mut Decoder<BufReader<File>>) -> Result<Crs> {
    let keys = decoder
        .find_tag(tag(GEO_KEY_DIRECTORY))?
        .context("missing GeoKeyDirectory tag")?
        .into_u32_vec()?;
    epsg_from_geokeys(&keys).map(Crs::from_epsg)
}

fn epsg_from_geokeys(keys: &[u32]) -> Result<u32> {
    if keys.len() < 4 {
        bail!("truncated GeoKey directory");
    }
    let mut geographic = None;
    let mut projected = None;
    // Header is 4 shorts; then (key, location, count, value) entries.
    for entry in keys[4..].chunks_exact(4) {
        let (key, location, value) = (entry[0] as u16, entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            PROJECTED_CS_TYPE_KEY => projected = Some(value),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(value),
            _ => {}
        }
    }
    match projected.or(geographic) {
        Some(code) if code != 32767 => Ok(code),
        Some(_) => bail!("user-defined CRS is not supported"),
        None => bail!("GeoKey directory names no EPSG code"),
    }
}

fn read_nodata(decoder: &mut Decoder<BufReader<File>>) -> Result<Option<f32>> {
    let Some(value) = decoder.find_tag(tag(GDAL_NODATA))? else {
        return Ok(None);
    };
    let text = value.into_string()?;
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match text.parse::<f32>() {
        Ok(v) => Ok(Some(v)),
        Err(_) if text.eq_ignore_ascii_case("nan") => Ok(None),
        Err(e) => Err(e).with_context(|| format!("unparseable no-data value \"{text}\"")),
    }
}

fn to_f32(image: DecodingResult) -> Result<Vec<f32>> {
    Ok(match image {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => bail!("unsupported sample format"),
    })
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Write `raster` as a Float32 GeoTIFF with NaN stored as `NODATA`.
pub fn write_raster(path: &Path, raster: &RasterLayer) -> Result<()> {
    let epsg = u16::try_from(raster.crs.epsg())
        .with_context(|| format!("EPSG code {} does not fit a GeoKey", raster.crs.epsg()))?;
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(raster.width as u32, raster.height as u32)?;

    let t = &raster.transform;
    let scale = [t.pixel_width, -t.pixel_height, 0.0];
    let tie = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    let (model_type, crs_key) = if raster.crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_KEY)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_KEY)
    };
    let keys: [u16; 16] = [
        1, 1, 0, 3,
        GT_MODEL_TYPE_KEY, 0, 1, model_type,
        GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
        crs_key, 0, 1, epsg,
    ];
    let nodata = format!("{NODATA}");

    let dir = image.encoder();
    dir.write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])?;
    dir.write_tag(tag(MODEL_TIEPOINT), &tie[..])?;
    dir.write_tag(tag(GEO_KEY_DIRECTORY), &keys[..])?;
    dir.write_tag(tag(GDAL_NODATA), nodata.as_str())?;

    image
        .write_data(&raster.to_sentinel_data())
        .with_context(|| format!("Write failed: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RasterLayer {
        let grid = Grid {
            width: 3,
            height: 2,
            transform: GeoTransform::new(500_000.0, 6_900_000.0, 30.0, -30.0),
            crs: Crs::from_epsg(32721),
        };
        RasterLayer::from_data(grid, vec![1.0, 2.0, 3.0, f32::NAN, 5.5, -2.0])
    }

    #[test]
    fn write_then_read_keeps_grid_and_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.tif");
        let raster = sample();
        write_raster(&path, &raster).unwrap();

        let back = read_raster(&path).unwrap();
        assert_eq!(back.grid(), raster.grid());
        assert!(back.get(1, 0).is_nan());
        assert_eq!(back.get(1, 1), 5.5);
        assert_eq!(back.get(1, 2), -2.0);
    }

    #[test]
    fn geographic_rasters_use_the_geographic_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wgs84.tif");
        let mut raster = sample();
        raster.crs = Crs::WGS84;
        raster.transform = GeoTransform::new(-60.0, -25.0, 0.001, -0.001);
        write_raster(&path, &raster).unwrap();
        assert_eq!(read_raster(&path).unwrap().crs, Crs::WGS84);
    }

    #[test]
    fn geokeys_prefer_projected_code() {
        let keys = [1, 1, 0, 2, 2048, 0, 1, 4326, 3072, 0, 1, 32721];
        assert_eq!(epsg_from_geokeys(&keys).unwrap(), 32721);
        assert!(epsg_from_geokeys(&[1, 1, 0, 1, 1024, 0, 1, 1]).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_raster(Path::new("/nonexistent/dem.tif")).is_err());
    }
}
