mod common;

use std::sync::Arc;

use dashmap::DashSet;
use tokio::task::JoinSet;

use crawl_queue::database::repositories::JobRepository;
use crawl_queue::domain::JobStatus;

use common::{repository_in, seed_pending, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_never_share_a_job() {
    let (dir, first) = setup().await;
    // A second repository with its own pools stands in for another scheduler.
    let second = repository_in(dir.path()).await;
    let jobs = seed_pending(first.as_ref(), 40).await;

    let claimed: Arc<DashSet<String>> = Arc::new(DashSet::new());
    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let repo: Arc<dyn JobRepository> = if i % 2 == 0 {
            first.clone()
        } else {
            second.clone()
        };
        let claimed = claimed.clone();
        tasks.spawn(async move {
            loop {
                let batch = repo.claim_pending_jobs(3, u32::MAX).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                for job in batch {
                    assert_eq!(job.status, JobStatus::Working);
                    assert!(claimed.insert(job.id.clone()), "job {} claimed twice", job.id);
                }
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    assert_eq!(claimed.len(), jobs.len());
    let counts = first.get_job_counts().await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.working, jobs.len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_respect_working_cap() {
    let (dir, first) = setup().await;
    let second = repository_in(dir.path()).await;
    seed_pending(first.as_ref(), 10).await;

    let mut tasks = JoinSet::new();
    for i in 0..6 {
        let repo: Arc<dyn JobRepository> = if i % 2 == 0 {
            first.clone()
        } else {
            second.clone()
        };
        tasks.spawn(async move { repo.claim_pending_jobs(2, 2).await.unwrap().len() });
    }

    let mut total = 0;
    while let Some(res) = tasks.join_next().await {
        total += res.unwrap();
    }

    assert_eq!(total, 2);
    assert_eq!(first.count_jobs_by_status(JobStatus::Working).await.unwrap(), 2);
    assert_eq!(first.count_jobs_by_status(JobStatus::Pending).await.unwrap(), 8);
}

#[tokio::test]
async fn losing_a_conditional_update_leaves_job_unchanged() {
    let (_dir, repo) = setup().await;
    let job = seed_pending(repo.as_ref(), 1).await.remove(0);

    let claimed = repo.claim_pending_jobs(1, 2).await.unwrap();
    assert_eq!(claimed.len(), 1);

    // A second claim sees nothing pending.
    assert!(repo.claim_pending_jobs(1, 2).await.unwrap().is_empty());
    assert_eq!(
        repo.get_job(&job.id).await.unwrap().status,
        JobStatus::Working
    );
}
