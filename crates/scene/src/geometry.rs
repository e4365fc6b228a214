use foundation::math::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Dimension of a window or a geometry value. Fixed at creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    D2,
    D3,
}

impl Dim {
    pub fn is_3d(self) -> bool {
        matches!(self, Dim::D3)
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub pos: Vec2,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose2 {
    pub pos: Vec2,
    pub theta: f32,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Vec2,
    pub radius: f32,
}

impl Default for Circle {
    fn default() -> Self {
        Self {
            center: Vec2::default(),
            radius: 1.0,
        }
    }
}

/// Axis-aligned-to-its-pose box, split into front/rear lengths so the
/// reference point can sit off-center (e.g. a vehicle's rear axle).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Box2 {
    pub center: Pose2,
    pub width: f32,
    pub len_front: f32,
    pub len_rear: f32,
}

impl Default for Box2 {
    fn default() -> Self {
        Self {
            center: Pose2::default(),
            width: 1.0,
            len_front: 1.0,
            len_rear: 1.0,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub points: Vec<Vec2>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub boxes: Vec<Box2>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Vec2>,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub pos: Vec3,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose3 {
    pub pos: Vec3,
    pub quat: Quat,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub center: Vec3,
    pub radius: f32,
}

impl Default for Ball {
    fn default() -> Self {
        Self {
            center: Vec3::default(),
            radius: 1.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Box3 {
    pub center: Pose3,
    pub x_len: f32,
    pub y_len: f32,
    pub z_len: f32,
}

impl Default for Box3 {
    fn default() -> Self {
        Self {
            center: Pose3::default(),
            x_len: 1.0,
            y_len: 1.0,
            z_len: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry2D {
    Point(Point2),
    Pose(Pose2),
    Circle(Circle),
    Box(Box2),
    Polyline(Polyline),
    Trajectory(Trajectory),
    Polygon(Polygon),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry3D {
    Point(Point3),
    Pose(Pose3),
    Ball(Ball),
    Box(Box3),
}

/// A geometry value of either dimension. The variant set is closed;
/// consumers dispatch by exhaustive match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeometryValue {
    D2(Geometry2D),
    D3(Geometry3D),
}

impl GeometryValue {
    pub fn dim(&self) -> Dim {
        match self {
            GeometryValue::D2(_) => Dim::D2,
            GeometryValue::D3(_) => Dim::D3,
        }
    }

    pub fn is_3d(&self) -> bool {
        self.dim().is_3d()
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A concrete shape that can be held by a [`Source`](crate::Source).
///
/// The set of implementors is closed: the 2D shapes `Point2`, `Pose2`,
/// `Circle`, `Box2`, `Polyline`, `Trajectory`, `Polygon` and the 3D
/// shapes `Point3`, `Pose3`, `Ball`, `Box3`.
pub trait Shape: Clone + Send + Sync + sealed::Sealed + 'static {
    const DIM: Dim;

    fn into_value(self) -> GeometryValue;
}

impl sealed::Sealed for Point2 {}
impl Shape for Point2 {
    const DIM: Dim = Dim::D2;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D2(Geometry2D::Point(self))
    }
}

impl sealed::Sealed for Pose2 {}
impl Shape for Pose2 {
    const DIM: Dim = Dim::D2;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D2(Geometry2D::Pose(self))
    }
}

impl sealed::Sealed for Circle {}
impl Shape for Circle {
    const DIM: Dim = Dim::D2;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D2(Geometry2D::Circle(self))
    }
}

impl sealed::Sealed for Box2 {}
impl Shape for Box2 {
    const DIM: Dim = Dim::D2;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D2(Geometry2D::Box(self))
    }
}

impl sealed::Sealed for Polyline {}
impl Shape for Polyline {
    const DIM: Dim = Dim::D2;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D2(Geometry2D::Polyline(self))
    }
}

impl sealed::Sealed for Trajectory {}
impl Shape for Trajectory {
    const DIM: Dim = Dim::D2;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D2(Geometry2D::Trajectory(self))
    }
}

impl sealed::Sealed for Polygon {}
impl Shape for Polygon {
    const DIM: Dim = Dim::D2;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D2(Geometry2D::Polygon(self))
    }
}

impl sealed::Sealed for Point3 {}
impl Shape for Point3 {
    const DIM: Dim = Dim::D3;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D3(Geometry3D::Point(self))
    }
}

impl sealed::Sealed for Pose3 {}
impl Shape for Pose3 {
    const DIM: Dim = Dim::D3;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D3(Geometry3D::Pose(self))
    }
}

impl sealed::Sealed for Ball {}
impl Shape for Ball {
    const DIM: Dim = Dim::D3;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D3(Geometry3D::Ball(self))
    }
}

impl sealed::Sealed for Box3 {}
impl Shape for Box3 {
    const DIM: Dim = Dim::D3;

    fn into_value(self) -> GeometryValue {
        GeometryValue::D3(Geometry3D::Box(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_dim_follows_variant() {
        let p = Point2::default().into_value();
        assert_eq!(p.dim(), Dim::D2);
        assert!(!p.is_3d());

        let b = Ball::default().into_value();
        assert_eq!(b.dim(), Dim::D3);
        assert!(b.is_3d());
    }

    #[test]
    fn shapes_compare_structurally() {
        let a = Polygon {
            vertices: vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)],
        };
        let b = a.clone();
        assert_eq!(a.into_value(), b.into_value());
    }
}
