use crate::boundaries::BoundaryCollection;
use crate::config::BrandHealthConfig;
use crate::processing::{CompetitorShare, LAT_COLUMN, LON_COLUMN};
use crate::types::{column_keys, float_values};
use geojson::FeatureCollection;
use polars::prelude::{DataFrame, PolarsResult};
use serde::Serialize;
use tracing::debug;

// Map presentation constants
const CHOROPLETH_COLORSCALE: &str = "RdBu";
const CHOROPLETH_OPACITY: f64 = 0.9;
const CHOROPLETH_LINE_WIDTH: f64 = 0.5;
const CHOROPLETH_ZOOM: f64 = 3.0;
const CHOROPLETH_CENTER: MapCenter = MapCenter { lat: 37.0902, lon: -95.7129 };
const POINT_MAP_ZOOM: f64 = 9.0;
const MAP_STYLE: &str = "carto-positron";
const BAR_TITLE: &str = "Average customer share by competitor brand";

/// Plotly-compatible figure.
#[derive(Debug, Clone, Serialize)]
pub struct Figure {
    pub data: Vec<Trace>,
    pub layout: Layout,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trace {
    Choroplethmapbox(ChoroplethTrace),
    Bar(BarTrace),
    Scattermapbox(ScatterTrace),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoroplethTrace {
    pub geojson: FeatureCollection,
    pub locations: Vec<String>,
    pub featureidkey: String,
    pub z: Vec<f64>,
    pub text: Vec<String>,
    pub colorscale: String,
    pub zmin: f64,
    pub zmax: f64,
    pub marker: Marker,
}

#[derive(Debug, Clone, Serialize)]
pub struct Marker {
    pub opacity: f64,
    pub line: MarkerLine,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkerLine {
    pub width: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BarTrace {
    pub x: Vec<f64>,
    pub y: Vec<String>,
    pub orientation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterTrace {
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub text: Vec<String>,
    pub mode: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Layout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapbox: Option<Mapbox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<Margin>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Mapbox {
    pub style: String,
    pub zoom: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<MapCenter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapCenter {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Margin {
    pub r: u32,
    pub t: u32,
    pub l: u32,
    pub b: u32,
}

/// A row left off the choropleth because its join key has no boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedRow {
    pub row: usize,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoroplethAssembly {
    pub figure: Figure,
    pub plotted: Vec<String>,
    pub dropped: Vec<DroppedRow>,
}

/// Binds brand-market rows to market polygons by join key.
pub fn assemble_choropleth(
    rows: &DataFrame,
    config: &BrandHealthConfig,
    boundaries: &BoundaryCollection,
) -> PolarsResult<ChoroplethAssembly> {
    let keys = column_keys(rows, &config.market_id_column)?;
    let values = float_values(rows, &config.yoy_change_column)?;
    let names = column_keys(rows, &config.market_name_column)?;

    let mut plotted = Vec::new();
    let mut z = Vec::new();
    let mut text = Vec::new();
    let mut dropped = Vec::new();

    for (row, ((key, value), name)) in keys.into_iter().zip(values).zip(names).enumerate() {
        match key {
            Some(key) if boundaries.contains_key(&key) => {
                plotted.push(key);
                z.push(value.unwrap_or(f64::NAN));
                text.push(name.unwrap_or_default());
            }
            key => dropped.push(DroppedRow { row, key }),
        }
    }

    if !dropped.is_empty() {
        debug!(dropped = dropped.len(), "rows without a matching boundary left off the map");
    }

    let trace = ChoroplethTrace {
        geojson: boundaries.to_feature_collection(plotted.iter().map(String::as_str)),
        locations: plotted.clone(),
        featureidkey: format!("properties.{}", boundaries.join_property()),
        z,
        text,
        colorscale: CHOROPLETH_COLORSCALE.to_string(),
        zmin: config.color_domain[0],
        zmax: config.color_domain[1],
        marker: Marker {
            opacity: CHOROPLETH_OPACITY,
            line: MarkerLine {
                width: CHOROPLETH_LINE_WIDTH,
            },
        },
    };

    let figure = Figure {
        data: vec![Trace::Choroplethmapbox(trace)],
        layout: Layout {
            title: None,
            mapbox: Some(Mapbox {
                style: MAP_STYLE.to_string(),
                zoom: CHOROPLETH_ZOOM,
                center: Some(CHOROPLETH_CENTER),
            }),
            margin: Some(Margin { r: 0, t: 0, l: 0, b: 0 }),
        },
    };

    Ok(ChoroplethAssembly {
        figure,
        plotted,
        dropped,
    })
}

/// Horizontal bar chart, one bar per competitor in the order given.
pub fn assemble_bar_chart(shares: &[CompetitorShare]) -> Figure {
    let trace = BarTrace {
        x: shares.iter().map(|s| s.cross_shopping_pct).collect(),
        y: shares.iter().map(|s| s.competitor.clone()).collect(),
        orientation: "h".to_string(),
    };
    Figure {
        data: vec![Trace::Bar(trace)],
        layout: Layout {
            title: Some(BAR_TITLE.to_string()),
            ..Layout::default()
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PointMapAssembly {
    pub figure: Figure,
    pub omitted: usize,
}

/// Scatter map of locations, centred on the mean plotted coordinate.
/// Rows without both coordinates are counted in `omitted`.
pub fn assemble_point_map(located: &DataFrame, hover_columns: &[String]) -> PolarsResult<PointMapAssembly> {
    let mut lat = Vec::new();
    let mut lon = Vec::new();
    let mut text = Vec::new();
    let mut omitted = 0;

    let labels = hover_columns
        .iter()
        .filter(|c| located.get_column_index(c).is_some())
        .map(|c| column_keys(located, c))
        .collect::<PolarsResult<Vec<_>>>()?;
    let lats = float_values(located, LAT_COLUMN)?;
    let lons = float_values(located, LON_COLUMN)?;

    for (row, coords) in lats.into_iter().zip(lons).enumerate() {
        match coords {
            (Some(y), Some(x)) => {
                lat.push(y);
                lon.push(x);
                let label: Vec<&str> = labels
                    .iter()
                    .filter_map(|column| column[row].as_deref())
                    .collect();
                text.push(label.join(", "));
            }
            _ => omitted += 1,
        }
    }

    let center = if lat.is_empty() {
        None
    } else {
        let n = lat.len() as f64;
        Some(MapCenter {
            lat: lat.iter().sum::<f64>() / n,
            lon: lon.iter().sum::<f64>() / n,
        })
    };

    let figure = Figure {
        data: vec![Trace::Scattermapbox(ScatterTrace {
            lat,
            lon,
            text,
            mode: "markers".to_string(),
        })],
        layout: Layout {
            title: None,
            mapbox: Some(Mapbox {
                style: MAP_STYLE.to_string(),
                zoom: POINT_MAP_ZOOM,
                center,
            }),
            margin: None,
        },
    };

    Ok(PointMapAssembly { figure, omitted })
}
