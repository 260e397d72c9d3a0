// 该文件是 Huishou （回收分拣） 项目的一部分。
// tests/result_sink.rs - 结果存储集成测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod common;

use huishou::{output::CsvResultSink, pipeline::Pipeline};

use common::{CountingLoader, ScriptedDetector, cascade, detection, write_image};

fn pipeline_with_store(store: &std::path::Path) -> Pipeline<ScriptedDetector, common::OneHot, CountingLoader, CsvResultSink> {
  let detector = ScriptedDetector::Detections(vec![
    detection(0.0, 0.0, 10.0, 10.0, 0.9),
    detection(10.0, 10.0, 20.0, 20.0, 0.7),
    detection(0.0, 10.0, 10.0, 20.0, 0.5),
  ]);
  Pipeline::new(
    cascade(detector, "detergent", CountingLoader::default()),
    CsvResultSink::new(store),
  )
}

#[test]
fn header_is_written_once_across_restarts() {
  let dir = tempfile::tempdir().unwrap();
  let image = write_image(dir.path(), "shelf.png", 32, 32);
  let store = dir.path().join("results.csv");

  pipeline_with_store(&store).classify_image(&image).unwrap();
  let lines = std::fs::read_to_string(&store).unwrap().lines().count();
  assert_eq!(lines, 1 + 3);

  // 新的存储实例模拟进程重启
  pipeline_with_store(&store).classify_image(&image).unwrap();
  let content = std::fs::read_to_string(&store).unwrap();
  let lines: Vec<&str> = content.lines().collect();

  assert_eq!(lines.len(), 1 + 6);
  assert_eq!(lines[0], "timestamp,source_name,object_id,category,subcategory");
  assert_eq!(lines.iter().filter(|l| l.starts_with("timestamp,")).count(), 1);
  for line in &lines[1..] {
    let fields: Vec<&str> = line.split(',').collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[0].len(), "2026-01-01 00:00:00".len());
    assert_eq!(fields[1], "shelf.png");
    assert_eq!(fields[3], "detergent");
    assert_eq!(fields[4], "detergent-white");
  }
}
