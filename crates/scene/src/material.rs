use foundation::Color;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointShape {
    #[default]
    Square,
    Circle,
    Cross,
    Diamond,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

/// Render hints attached to an object at registration time.
///
/// Immutable once the object is tracked; changing the look of an object
/// means removing and re-adding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub color: Color,
    pub fill_color: Color,
    pub filled: bool,
    pub point_size: f32,
    pub line_width: f32,
    pub point_shape: PointShape,
    pub line_style: LineStyle,
    /// Legend label; empty string suppresses the legend entry.
    pub legend: String,
}

impl Material {
    pub fn with_color(color: Color) -> Self {
        Self {
            color,
            fill_color: color,
            ..Self::default()
        }
    }

    pub fn with_legend(mut self, legend: impl Into<String>) -> Self {
        self.legend = legend.into();
        self
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            fill_color: Color::WHITE,
            filled: false,
            point_size: 1.0,
            line_width: 1.0,
            point_shape: PointShape::default(),
            line_style: LineStyle::default(),
            legend: String::new(),
        }
    }
}
