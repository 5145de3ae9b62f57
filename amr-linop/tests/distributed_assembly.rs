//! Assembly and solves across simulated rank groups

use std::thread;

use amr_linop::assembly::{AssemblerMasks, DistributedAssembler, KrylovBackend};
use amr_linop::{
    AbecLaplacian, BackendConfig, BackendMethod, BcType, BoundaryConditions, BoxLayout, Geometry,
    IndexType, LinOpConfig, MeshHierarchy, MultiFab,
};
use amr_solvers::{Communicator, LocalComm};
use approx::assert_relative_eq;

/// 8x8 cells in four 4x4 patches spread contiguously over `nranks`
fn layout(nranks: usize) -> (Geometry, BoxLayout) {
    let geom = Geometry::uniform(2, 8).unwrap();
    let boxes = BoxLayout::chop(geom.domain(), 4, 2);
    let layout = BoxLayout::contiguous(boxes, nranks).unwrap();
    (geom, layout)
}

/// Run `f` on every rank of an `nranks` group and collect the results in rank order
fn on_ranks<T, F>(nranks: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&LocalComm) -> T + Sync,
{
    let comms = LocalComm::group(nranks);
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = comms.iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn operator<'c>(comm: &'c LocalComm, nranks: usize, bc: BcType, a: f64) -> AbecLaplacian<'c> {
    let (geom, layout) = layout(nranks);
    let config = LinOpConfig::default();
    let h = MeshHierarchy::single_level(geom, layout, &config).unwrap();
    let bc = BoundaryConditions::all(1, 2, bc);
    let mut op = AbecLaplacian::define(comm, h, bc, 1, config).unwrap();
    op.set_scalars(a, 1.0);
    op.set_a_coeffs_scalar(0, 1.0).unwrap();
    op.update().unwrap();
    op
}

#[test]
fn numbering_is_a_bijection_for_every_rank_count() {
    for nranks in [1, 2, 4] {
        let results = on_ranks(nranks, |comm| {
            let op = operator(comm, nranks, BcType::Dirichlet, 0.0);
            let stencil = op.level_stencil(0, 0).unwrap();
            let geom = op.hierarchy().geom(0, 0);
            let layout = op.hierarchy().layout(0, 0);
            let backend = KrylovBackend::new(comm, BackendConfig::default());
            let mut asm =
                DistributedAssembler::<i32, _>::new(comm, geom, layout, IndexType::Cell, AssemblerMasks::default(), backend)
                    .unwrap();
            asm.setup(&stencil).unwrap();

            let gathered = asm.node_ids().gather_valid(comm);
            let mut all: Vec<i64> = gathered
                .iter()
                .flatten()
                .flat_map(|fab| fab.bx().points().map(|p| fab.get(p, 0) as i64).collect::<Vec<_>>())
                .collect();
            all.sort_unstable();
            (asm.range(), asm.counts().to_vec(), all)
        });

        let mut expected_begin = 0;
        for (rank, ((begin, end), counts, all)) in results.iter().enumerate() {
            assert_eq!(counts.iter().sum::<i64>(), 64, "{nranks} ranks");
            assert_eq!(*begin, expected_begin);
            assert_eq!(end - begin + 1, counts[rank]);
            expected_begin = end + 1;
            assert_eq!(*all, (0..64).collect::<Vec<i64>>());
        }
    }
}

/// Solve the pinned Neumann problem and return the gathered, mean-free solution
fn pinned_neumann_solution(nranks: usize) -> Vec<f64> {
    let results = on_ranks(nranks, |comm| {
        let op = operator(comm, nranks, BcType::Neumann, 0.0);
        assert!(op.is_bottom_singular());
        let layout = op.hierarchy().layout(0, 0).clone();

        let mut rhs = MultiFab::cell(&layout, 2, comm.rank(), 1, 0);
        for li in 0..rhs.num_local() {
            for p in rhs.valid_box(li).points() {
                rhs.fab_mut(li).set(p, 0, p[0] as f64 - 3.5);
            }
        }
        let mut soln = MultiFab::cell(&layout, 2, comm.rank(), 1, 1);
        {
            let stencil = op.level_stencil(0, 0).unwrap();
            let config = BackendConfig {
                method: BackendMethod::BiCgStab,
                ..BackendConfig::default()
            };
            let backend = KrylovBackend::new(comm, config);
            let geom = op.hierarchy().geom(0, 0);
            let mut asm =
                DistributedAssembler::<i64, _>::new(comm, geom, &layout, IndexType::Cell, AssemblerMasks::default(), backend)
                    .unwrap();
            asm.setup(&stencil).unwrap();
            asm.solve(&mut soln, &rhs, 1e-10, 0.0, 2000).unwrap();
        }

        op.fill_ghosts(0, 0, &mut soln).unwrap();
        let mut resid = MultiFab::cell(&layout, 2, comm.rank(), 1, 0);
        op.residual(0, 0, &mut resid, &soln, &rhs).unwrap();
        assert!(resid.norm_inf(0, comm) < 1e-6 * rhs.norm_inf(0, comm));

        let mean = soln.sum(0, comm) / 64.0;
        let mut flat = vec![0.0; 64];
        for fab in soln.gather_valid(comm).iter().flatten() {
            for p in fab.bx().points() {
                flat[(p[1] * 8 + p[0]) as usize] = fab.get(p, 0) - mean;
            }
        }
        flat
    });
    results.into_iter().next().unwrap()
}

#[test]
fn pinned_singular_solve_is_independent_of_rank_count() {
    let serial = pinned_neumann_solution(1);
    assert!(serial.iter().any(|v| v.abs() > 1e-3));
    for nranks in [2, 4] {
        let parallel = pinned_neumann_solution(nranks);
        for (s, p) in serial.iter().zip(&parallel) {
            assert_relative_eq!(*s, *p, epsilon = 1e-6);
        }
    }
}

#[test]
fn dirichlet_cg_solve_on_two_ranks() {
    let norms = on_ranks(2, |comm| {
        let op = operator(comm, 2, BcType::Dirichlet, 1.0);
        let layout = op.hierarchy().layout(0, 0).clone();
        let mut rhs = MultiFab::cell(&layout, 2, comm.rank(), 1, 0);
        rhs.set_val(1.0);
        let mut soln = MultiFab::cell(&layout, 2, comm.rank(), 1, 1);
        {
            let stencil = op.level_stencil(0, 0).unwrap();
            let config = BackendConfig {
                method: BackendMethod::Cg,
                ..BackendConfig::default()
            };
            let backend = KrylovBackend::new(comm, config);
            let geom = op.hierarchy().geom(0, 0);
            let mut asm =
                DistributedAssembler::<i32, _>::new(comm, geom, &layout, IndexType::Cell, AssemblerMasks::default(), backend)
                    .unwrap();
            asm.setup(&stencil).unwrap();
            asm.solve(&mut soln, &rhs, 1e-12, 0.0, 500).unwrap();
        }
        op.fill_ghosts(0, 0, &mut soln).unwrap();
        let mut resid = MultiFab::cell(&layout, 2, comm.rank(), 1, 0);
        op.residual(0, 0, &mut resid, &soln, &rhs).unwrap();
        (resid.norm_inf(0, comm), soln.norm_inf(0, comm))
    });
    for (resid, soln) in norms {
        assert!(resid < 1e-8);
        assert!(soln > 0.0);
    }
}
