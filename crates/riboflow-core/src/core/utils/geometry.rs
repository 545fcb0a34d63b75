use nalgebra::{Matrix3, Point3, Vector3};

/// Centroid of a coordinate set.
fn centroid(coords: &[Point3<f64>]) -> Vector3<f64> {
    let sum = coords
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    sum / coords.len() as f64
}

/// Optimal least-squares rotation (Kabsch) aligning `mobile` onto `target`
/// after both sets are centered. Returns `None` when the SVD fails to
/// converge, which does not happen for finite inputs.
fn kabsch_rotation(
    mobile: &[Point3<f64>],
    target: &[Point3<f64>],
    mobile_center: &Vector3<f64>,
    target_center: &Vector3<f64>,
) -> Option<Matrix3<f64>> {
    let mut covariance = Matrix3::zeros();
    for (m, t) in mobile.iter().zip(target.iter()) {
        covariance += (m.coords - mobile_center) * (t.coords - target_center).transpose();
    }

    let svd = covariance.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    // Reflection correction: force a proper rotation (det = +1).
    let d = (v_t.transpose() * u.transpose()).determinant().signum();
    let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
    Some(v_t.transpose() * correction * u.transpose())
}

/// Root-mean-square deviation between two coordinate sets after optimal
/// rigid-body superposition (translation + rotation).
///
/// Returns `None` if the sets differ in length or are empty; callers compare
/// structures atom-for-atom and must treat a length mismatch as an error,
/// never as a silently skipped pair.
pub fn superposed_rmsd(a: &[Point3<f64>], b: &[Point3<f64>]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let ca = centroid(a);
    let cb = centroid(b);
    let rotation = kabsch_rotation(a, b, &ca, &cb)?;

    let n = a.len() as f64;
    let squared_sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(pa, pb)| {
            let aligned = rotation * (pa.coords - ca);
            (aligned - (pb.coords - cb)).norm_squared()
        })
        .sum();
    Some((squared_sum / n).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    fn helix_like() -> Vec<Point3<f64>> {
        (0..12)
            .map(|i| {
                let t = i as f64 * 0.6;
                Point3::new(t.cos() * 4.0, t.sin() * 4.0, i as f64 * 1.5)
            })
            .collect()
    }

    #[test]
    fn identical_sets_have_zero_rmsd() {
        let coords = helix_like();
        let rmsd = superposed_rmsd(&coords, &coords).unwrap();
        assert!(rmsd.abs() < 1e-9);
    }

    #[test]
    fn rotated_and_translated_copy_has_zero_rmsd() {
        let coords = helix_like();
        let rotation = Rotation3::from_euler_angles(0.3, -1.1, 2.4);
        let shift = Vector3::new(10.0, -5.0, 3.0);
        let moved: Vec<Point3<f64>> = coords
            .iter()
            .map(|p| Point3::from(rotation * p.coords + shift))
            .collect();
        let rmsd = superposed_rmsd(&coords, &moved).unwrap();
        assert!(rmsd < 1e-8, "rmsd was {rmsd}");
    }

    #[test]
    fn perturbed_copy_has_positive_rmsd() {
        let coords = helix_like();
        let mut perturbed = coords.clone();
        perturbed[0].x += 3.0;
        let rmsd = superposed_rmsd(&coords, &perturbed).unwrap();
        assert!(rmsd > 0.1);
    }

    #[test]
    fn mirrored_set_is_not_matched_by_a_reflection() {
        // The Kabsch correction must keep the alignment a proper rotation,
        // so a mirror image of a chiral set cannot be superposed to zero.
        let coords = helix_like();
        let mirrored: Vec<Point3<f64>> = coords
            .iter()
            .map(|p| Point3::new(-p.x, p.y, p.z))
            .collect();
        let rmsd = superposed_rmsd(&coords, &mirrored).unwrap();
        assert!(rmsd > 0.5, "reflection leaked into the rotation: {rmsd}");
    }

    #[test]
    fn length_mismatch_returns_none() {
        let coords = helix_like();
        assert!(superposed_rmsd(&coords, &coords[1..]).is_none());
        assert!(superposed_rmsd(&[], &[]).is_none());
    }

    #[test]
    fn superposition_beats_raw_distance() {
        // A pure translation has huge raw deviation but zero superposed RMSD.
        let coords = helix_like();
        let shifted: Vec<Point3<f64>> = coords
            .iter()
            .map(|p| Point3::new(p.x + 100.0, p.y, p.z))
            .collect();
        let rmsd = superposed_rmsd(&coords, &shifted).unwrap();
        assert!(rmsd < 1e-9);
    }
}
