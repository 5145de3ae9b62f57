//! End-to-end checks of the operator on small, hand-computable meshes

use amr_linop::assembly::{AssemblerMasks, DistributedAssembler, KrylovBackend, SparseBackend, VectorKind};
use amr_linop::{
    AbecLaplacian, BackendConfig, BcType, BoundaryConditions, BoxLayout, Geometry, IMultiFab,
    IndexBox, IndexType, LinOpConfig, MeshHierarchy, MultiFab, SmoothStrategy,
};
use amr_solvers::SerialComm;
use approx::assert_relative_eq;

fn single_level(dim: usize, n: i64, max_patch: i64) -> (MeshHierarchy, BoxLayout) {
    let geom = Geometry::uniform(dim, n).unwrap();
    let layout = BoxLayout::single_rank(BoxLayout::chop(geom.domain(), max_patch, dim)).unwrap();
    let h = MeshHierarchy::single_level(geom, layout.clone(), &LinOpConfig::default()).unwrap();
    (h, layout)
}

/// Robin values with uniform `(a, b, f)` on every cell and ghost
fn robin_values(layout: &BoxLayout, dim: usize, a: f64, b: f64, f: f64) -> MultiFab {
    let mut rbc = MultiFab::cell(layout, dim, 0, 3, 1);
    for li in 0..rbc.num_local() {
        let fab = rbc.fab_mut(li);
        let bx = *fab.bx();
        for (comp, v) in [a, b, f].into_iter().enumerate() {
            fab.fill_region(&bx, comp, v);
        }
    }
    rbc
}

#[test]
fn robin_with_zero_a_leaves_diagonal() {
    let (h, layout) = single_level(1, 8, 8);
    let bc = BoundaryConditions::uniform(1, &[BcType::Neumann], &[BcType::Robin]);
    let mut op = AbecLaplacian::define(&SerialComm, h, bc, 1, LinOpConfig::default()).unwrap();
    op.set_scalars(1.0, 1.0);
    op.set_a_coeffs_scalar(0, 1.0).unwrap();
    op.set_robin_bc_values(0, &robin_values(&layout, 1, 0.0, 1.0, 0.0)).unwrap();
    op.update().unwrap();

    let a = op.coefficients().a(0, 0).fab(0);
    assert_relative_eq!(a.get([7, 0, 0], 0), 1.0);
    assert_relative_eq!(a.get([0, 0, 0], 0), 1.0);
}

#[test]
fn robin_folds_into_boundary_cell() {
    let (h, layout) = single_level(1, 8, 8);
    let bc = BoundaryConditions::uniform(1, &[BcType::Neumann], &[BcType::Robin]);
    let mut op = AbecLaplacian::define(&SerialComm, h, bc, 1, LinOpConfig::default()).unwrap();
    op.set_scalars(1.0, 1.0);
    op.set_a_coeffs_scalar(0, 1.0).unwrap();
    op.set_robin_bc_values(0, &robin_values(&layout, 1, 1.0, 1.0, 0.0)).unwrap();
    op.update().unwrap();

    let (_, b_lin) = amr_linop::robin_ghost_extrapolation(1.0, 1.0, 0.0, 0.125);
    let expected = amr_linop::robin_alpha_correction(1.0, b_lin, 1.0, 0.125);
    let a = op.coefficients().a(0, 0).fab(0);
    assert_relative_eq!(a.get([7, 0, 0], 0), expected, epsilon = 1e-12);
    assert_relative_eq!(a.get([6, 0, 0], 0), 1.0);
    assert!(!op.is_bottom_singular());
}

#[test]
fn robin_promotes_zero_a_scalar() {
    let (h, layout) = single_level(1, 8, 8);
    let bc = BoundaryConditions::uniform(1, &[BcType::Neumann], &[BcType::Robin]);
    let mut op = AbecLaplacian::define(&SerialComm, h, bc, 1, LinOpConfig::default()).unwrap();
    op.set_scalars(0.0, 1.0);
    op.set_robin_bc_values(0, &robin_values(&layout, 1, 2.0, 1.0, 0.0)).unwrap();
    op.update().unwrap();

    assert_eq!(op.coefficients().a_scalar(), 1.0);
    let a = op.coefficients().a(0, 0).fab(0);
    assert!(a.get([7, 0, 0], 0) > 0.0);
    assert_eq!(a.get([3, 0, 0], 0), 0.0);
}

#[test]
fn fine_level_b_restricts_onto_covered_coarse_faces() {
    let config = LinOpConfig::default();
    let coarse = Geometry::uniform(2, 8).unwrap();
    let fine = Geometry::uniform(2, 16).unwrap();
    let coarse_layout = BoxLayout::single_rank(BoxLayout::chop(coarse.domain(), 4, 2)).unwrap();
    let fine_layout = BoxLayout::single_rank(vec![IndexBox::new([0, 0, 0], [7, 7, 0])]).unwrap();
    let h = MeshHierarchy::build(vec![coarse, fine], vec![coarse_layout, fine_layout], &[2], &config).unwrap();
    let bc = BoundaryConditions::all(1, 2, BcType::Dirichlet);
    let mut op = AbecLaplacian::define(&SerialComm, h, bc, 1, config).unwrap();
    op.set_scalars(1.0, 1.0);
    op.set_b_coeffs_scalar(1, 2.0).unwrap();
    op.update().unwrap();

    // the fine patch covers coarse cells [0, 3] x [0, 3], held by coarse patch 0
    let bx = op.coefficients().b(0, 0, 0);
    let li = bx.local_index(0).unwrap();
    let fab = bx.fab(li);
    for f in IndexBox::new([0, 0, 0], [4, 3, 0]).points() {
        assert_eq!(fab.get(f, 0), 2.0);
    }
    let by = op.coefficients().b(0, 0, 1).fab(li);
    assert_eq!(by.get([2, 2, 0], 0), 2.0);

    // faces of an uncovered coarse patch keep the default
    let other = bx.local_index(1).unwrap();
    assert_eq!(bx.fab(other).get([5, 1, 0], 0), 1.0);
}

#[test]
fn single_patch_ids_are_row_major() {
    let (h, _) = single_level(2, 4, 4);
    let bc = BoundaryConditions::all(1, 2, BcType::Dirichlet);
    let mut op = AbecLaplacian::define(&SerialComm, h, bc, 1, LinOpConfig::default()).unwrap();
    op.update().unwrap();
    let stencil = op.level_stencil(0, 0).unwrap();
    let geom = op.hierarchy().geom(0, 0);
    let layout = op.hierarchy().layout(0, 0);
    let backend = KrylovBackend::new(&SerialComm, BackendConfig::default());
    let mut asm =
        DistributedAssembler::<i32, _>::new(&SerialComm, geom, layout, IndexType::Cell, AssemblerMasks::default(), backend)
            .unwrap();
    asm.setup(&stencil).unwrap();

    let ids = asm.node_ids().fab(0);
    let mut expected = 0;
    for p in IndexBox::from_size(&[4, 4]).points() {
        assert_eq!(ids.get(p, 0), expected);
        expected += 1;
    }
    assert_eq!(asm.range(), (0, 15));
}

fn singular_assembly(adjust: bool) -> (Vec<f64>, f64, f64) {
    let (h, layout) = single_level(2, 4, 4);
    let bc = BoundaryConditions::all(1, 2, BcType::Neumann);
    let mut op = AbecLaplacian::define(&SerialComm, h, bc, 1, LinOpConfig::default()).unwrap();
    op.set_scalars(0.0, 1.0);
    op.update().unwrap();
    assert!(op.is_bottom_singular());

    let stencil = op.level_stencil(0, 0).unwrap();
    let geom = op.hierarchy().geom(0, 0);
    let config = BackendConfig {
        adjust_singular_matrix: adjust,
        ..BackendConfig::default()
    };
    let backend = KrylovBackend::new(&SerialComm, config);
    let mut asm =
        DistributedAssembler::<i32, _>::new(&SerialComm, geom, &layout, IndexType::Cell, AssemblerMasks::default(), backend)
            .unwrap();
    asm.setup(&stencil).unwrap();

    let mut soln = MultiFab::cell(&layout, 2, 0, 1, 0);
    let mut rhs = MultiFab::cell(&layout, 2, 0, 1, 0);
    rhs.set_val(5.0);
    asm.load_vectors(&mut soln, &rhs).unwrap();

    let matrix = asm.backend().matrix().unwrap();
    let row0: Vec<f64> = (0..16).map(|c| matrix.get(0, c)).collect();
    let mut b = [0.0];
    asm.backend().get_vector(VectorKind::Rhs, &[0_i32], &mut b).unwrap();
    (row0, matrix.get(1, 0), b[0])
}

#[test]
fn singular_system_pins_row_zero() {
    // corner cell: two interior neighbours at 16 each, Neumann faces cancel
    let (row0, below, rhs0) = singular_assembly(true);
    assert_relative_eq!(row0[0], 32.0);
    assert!(row0[1..].iter().all(|&v| v == 0.0));
    assert_relative_eq!(below, -16.0);
    assert_eq!(rhs0, 0.0);

    let (row0, _, rhs0) = singular_assembly(false);
    assert_relative_eq!(row0[0], 32.0);
    assert_relative_eq!(row0[1], -16.0);
    assert_relative_eq!(row0[4], -16.0);
    assert_eq!(rhs0, 5.0);
}

#[test]
fn assembled_solve_satisfies_operator() {
    let (h, layout) = single_level(2, 8, 4);
    let bc = BoundaryConditions::all(1, 2, BcType::Dirichlet);
    let mut op = AbecLaplacian::define(&SerialComm, h, bc, 1, LinOpConfig::default()).unwrap();
    op.set_scalars(1.0, 1.0);
    op.set_a_coeffs_scalar(0, 1.0).unwrap();
    op.set_b_coeffs_scalar(0, 0.5).unwrap();
    op.update().unwrap();

    let mut rhs = MultiFab::cell(&layout, 2, 0, 1, 0);
    for li in 0..rhs.num_local() {
        let vb = rhs.valid_box(li);
        for p in vb.points() {
            rhs.fab_mut(li).set(p, 0, 1.0 + (p[0] * p[1]) as f64);
        }
    }
    let mut soln = MultiFab::cell(&layout, 2, 0, 1, 1);
    {
        let stencil = op.level_stencil(0, 0).unwrap();
        let geom = op.hierarchy().geom(0, 0);
        let config = BackendConfig {
            method: amr_linop::BackendMethod::Cg,
            ..BackendConfig::default()
        };
        let backend = KrylovBackend::new(&SerialComm, config);
        let mut asm =
            DistributedAssembler::<i64, _>::new(&SerialComm, geom, &layout, IndexType::Cell, AssemblerMasks::default(), backend)
                .unwrap();
        asm.setup(&stencil).unwrap();
        let stats = asm.solve(&mut soln, &rhs, 1e-12, 0.0, 500).unwrap();
        assert!(stats.iterations > 0);
    }

    op.fill_ghosts(0, 0, &mut soln).unwrap();
    let mut resid = MultiFab::cell(&layout, 2, 0, 1, 0);
    op.residual(0, 0, &mut resid, &soln, &rhs).unwrap();
    assert!(resid.norm_inf(0, &SerialComm) < 1e-8 * rhs.norm_inf(0, &SerialComm));
}

#[test]
fn assembled_overset_matrix_matches_apply() {
    let (h, layout) = single_level(2, 8, 4);
    let mut mask = IMultiFab::cell(&layout, 2, 0, 1, 0);
    mask.set_val(1);
    let pinned = IndexBox::new([2, 2, 0], [5, 5, 0]);
    for li in 0..mask.num_local() {
        mask.fab_mut(li).fill_region(&pinned, 0, 0);
    }
    let bc = BoundaryConditions::all(1, 2, BcType::Dirichlet);
    let mut op =
        AbecLaplacian::define_with_overset(&SerialComm, h, bc, 1, LinOpConfig::default(), vec![Some(mask)]).unwrap();
    op.set_scalars(1.0, 1.0);
    op.set_a_coeffs_scalar(0, 2.0).unwrap();
    op.update().unwrap();

    let mut x = MultiFab::cell(&layout, 2, 0, 1, 1);
    for li in 0..x.num_local() {
        for p in x.valid_box(li).points() {
            x.fab_mut(li).set(p, 0, 1.0 + 0.1 * (p[0] * p[0]) as f64 - 0.3 * p[1] as f64);
        }
    }
    op.fill_ghosts(0, 0, &mut x).unwrap();
    let mut y = MultiFab::cell(&layout, 2, 0, 1, 0);
    op.apply(0, 0, &mut y, &x).unwrap();

    let stencil = op.level_stencil(0, 0).unwrap();
    let geom = op.hierarchy().geom(0, 0);
    let config = BackendConfig {
        method: amr_linop::BackendMethod::Identity,
        ..BackendConfig::default()
    };
    let backend = KrylovBackend::new(&SerialComm, config);
    let mut asm =
        DistributedAssembler::<i64, _>::new(&SerialComm, geom, &layout, IndexType::Cell, AssemblerMasks::default(), backend)
            .unwrap();
    asm.setup(&stencil).unwrap();

    let n = asm.global_size() as usize;
    let mut xg = vec![0.0; n];
    for li in 0..x.num_local() {
        let ids = asm.node_ids().fab(li);
        for p in x.valid_box(li).points() {
            xg[ids.get(p, 0) as usize] = x.fab(li).get(p, 0);
        }
    }

    let matrix = asm.backend().matrix().unwrap();
    for li in 0..y.num_local() {
        let ids = asm.node_ids().fab(li);
        for p in y.valid_box(li).points() {
            let row = ids.get(p, 0) as usize;
            if pinned.contains(p) {
                assert_eq!(matrix.get(row, row), 1.0);
                assert_eq!((0..n).filter(|&c| matrix.get(row, c) != 0.0).count(), 1);
                assert_eq!(y.fab(li).get(p, 0), 0.0);
            } else {
                let ax: f64 = (0..n).map(|c| matrix.get(row, c) * xg[c]).sum();
                assert_relative_eq!(ax, y.fab(li).get(p, 0), epsilon = 1e-9, max_relative = 1e-12);
            }
        }
    }

    // pinned rows solve to zero whatever the right-hand side
    let mut rhs = MultiFab::cell(&layout, 2, 0, 1, 0);
    rhs.set_val(7.0);
    let mut soln = MultiFab::cell(&layout, 2, 0, 1, 0);
    asm.solve(&mut soln, &rhs, 0.0, 0.0, 1).unwrap();
    for li in 0..soln.num_local() {
        for p in soln.valid_box(li).points() {
            let expected = if pinned.contains(p) { 0.0 } else { 7.0 };
            assert_eq!(soln.fab(li).get(p, 0), expected);
        }
    }
}

#[test]
fn semicoarsened_levels_relax_by_lines() {
    let geom = Geometry::new(2, IndexBox::from_size(&[16, 4]), &[1.0 / 16.0, 1.0 / 4.0], &[false, false]).unwrap();
    let layout = BoxLayout::single_rank(BoxLayout::chop(geom.domain(), 8, 2)).unwrap();
    let config = LinOpConfig {
        enable_semicoarsening: true,
        max_mg_levels: 3,
        ..LinOpConfig::default()
    };
    let h = MeshHierarchy::single_level(geom, layout, &config).unwrap();
    let bc = BoundaryConditions::all(1, 2, BcType::Dirichlet);
    let mut op = AbecLaplacian::define(&SerialComm, h, bc, 1, config).unwrap();
    op.update().unwrap();

    let bottom = op.num_mg_levels(0) - 1;
    assert_eq!(bottom, 2);
    assert_eq!(op.smooth_strategy(0, 0), SmoothStrategy::Plain);
    assert_eq!(op.smooth_strategy(0, 1), SmoothStrategy::LineSolve);
    assert_eq!(op.smooth_strategy(0, bottom), SmoothStrategy::LineSolve);

    for mglev in 1..=bottom {
        let layout = op.hierarchy().layout(0, mglev).clone();
        let mut sol = MultiFab::cell(&layout, 2, 0, 1, 1);
        let mut rhs = MultiFab::cell(&layout, 2, 0, 1, 0);
        rhs.set_val(1.0);
        let mut resid = MultiFab::cell(&layout, 2, 0, 1, 0);

        let norm = |sol: &mut MultiFab, resid: &mut MultiFab| {
            op.fill_ghosts(0, mglev, sol).unwrap();
            op.residual(0, mglev, resid, sol, &rhs).unwrap();
            resid.norm_inf(0, &SerialComm)
        };
        let initial = norm(&mut sol, &mut resid);
        for _ in 0..50 {
            op.smooth(0, mglev, &mut sol, &rhs, 0).unwrap();
            op.smooth(0, mglev, &mut sol, &rhs, 1).unwrap();
        }
        let last = norm(&mut sol, &mut resid);
        assert!(last < 1e-2 * initial, "level {mglev}: {last} vs {initial}");
    }
}
