//! Connectivity: which wires, pins and labels form one net
//!
//! Nodes are snapped points, `(designator, pin)` pairs and label names. A
//! single union-find pass joins wire ends, pins to their connection points,
//! points lying on a wire, and same-named labels. The same graph is rebuilt
//! over converted output to check that no net was split or merged.

use crate::geometry::Point;
use crate::model::{Endpoint, Net, NetNaming, SchematicPage};
use petgraph::unionfind::UnionFind;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Points closer than this many units apart are the same node (OrCAD units)
pub const SOURCE_RESOLUTION: f64 = 1_000.0;
/// Destination grid, per millimetre
pub const DESTINATION_RESOLUTION: f64 = 10_000.0;

type GridKey = (i64, i64);

#[derive(Debug, Clone)]
enum Node {
    Point(Point),
    Pin,
    Label,
}

/// Graph of one page, in whatever units the caller adds
#[derive(Debug, Clone)]
pub struct ConnectivityGraph {
    resolution: f64,
    nodes: Vec<Node>,
    points: HashMap<GridKey, usize>,
    pins: Vec<(String, String, usize)>,
    pin_nodes: HashMap<(String, String), usize>,
    label_names: HashMap<String, usize>,
    /// Point node of each wire end
    wires: Vec<(usize, usize)>,
    /// Point node of each label
    labels: Vec<usize>,
    edges: Vec<(usize, usize)>,
}

/// One connected component, members listed by insertion index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Component {
    /// `(designator, pin)` in natural order
    pub pins: Vec<(String, String)>,
    pub wires: Vec<usize>,
    pub labels: Vec<usize>,
    /// Distinct points, ordered by x then y
    pub points: Vec<Point>,
}

impl Component {
    /// Worth naming: anything beyond a lone pin or point
    pub fn is_net(&self) -> bool {
        !self.wires.is_empty() || !self.labels.is_empty() || self.pins.len() >= 2
    }
}

impl ConnectivityGraph {
    pub fn new(resolution: f64) -> Self {
        Self {
            resolution,
            nodes: Vec::new(),
            points: HashMap::new(),
            pins: Vec::new(),
            pin_nodes: HashMap::new(),
            label_names: HashMap::new(),
            wires: Vec::new(),
            labels: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn key(&self, p: Point) -> GridKey {
        (
            (p.x * self.resolution).round() as i64,
            (p.y * self.resolution).round() as i64,
        )
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Node for a point, created on first use
    pub fn add_point(&mut self, p: Point) -> usize {
        let key = self.key(p);
        if let Some(&id) = self.points.get(&key) {
            return id;
        }
        let id = self.push(Node::Point(p));
        self.points.insert(key, id);
        id
    }

    /// Returns the wire's index
    pub fn add_wire(&mut self, start: Point, end: Point) -> usize {
        let a = self.add_point(start);
        let b = self.add_point(end);
        self.edges.push((a, b));
        self.wires.push((a, b));
        self.wires.len() - 1
    }

    pub fn add_pin(&mut self, designator: &str, pin: &str, at: Point) {
        let point = self.add_point(at);
        let key = (designator.to_string(), pin.to_string());
        let node = match self.pin_nodes.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.push(Node::Pin);
                self.pin_nodes.insert(key.clone(), id);
                self.pins.push((key.0, key.1, id));
                id
            }
        };
        self.edges.push((node, point));
    }

    /// Returns the label's index
    pub fn add_label(&mut self, name: &str, at: Point) -> usize {
        let point = self.add_point(at);
        let name_node = match self.label_names.get(name) {
            Some(&id) => id,
            None => {
                let id = self.push(Node::Label);
                self.label_names.insert(name.to_string(), id);
                id
            }
        };
        self.edges.push((name_node, point));
        self.labels.push(point);
        self.labels.len() - 1
    }

    /// Point nodes lying strictly inside a wire, with that wire's index
    pub fn interior_points(&self) -> Vec<(Point, usize)> {
        let mut found = Vec::new();
        for (w, &(a, b)) in self.wires.iter().enumerate() {
            let (Node::Point(pa), Node::Point(pb)) = (&self.nodes[a], &self.nodes[b]) else {
                continue;
            };
            for &id in self.points.values() {
                if id == a || id == b {
                    continue;
                }
                if let Node::Point(p) = &self.nodes[id] {
                    if on_segment(*p, *pa, *pb, 0.5 / self.resolution) {
                        found.push((*p, w));
                    }
                }
            }
        }
        found.sort_by(|x, y| point_order(x.0, y.0).then(x.1.cmp(&y.1)));
        found
    }

    /// Connected components in a stable order (by first point, then first pin)
    pub fn components(&self) -> Vec<Component> {
        let mut sets = UnionFind::<usize>::new(self.nodes.len());
        for &(a, b) in &self.edges {
            sets.union(a, b);
        }
        for (p, w) in self.interior_points() {
            let id = self.points[&self.key(p)];
            sets.union(id, self.wires[w].0);
        }

        let mut by_root: BTreeMap<usize, Component> = BTreeMap::new();
        for (designator, pin, id) in &self.pins {
            by_root
                .entry(sets.find(*id))
                .or_default()
                .pins
                .push((designator.clone(), pin.clone()));
        }
        for (w, &(a, _)) in self.wires.iter().enumerate() {
            by_root.entry(sets.find(a)).or_default().wires.push(w);
        }
        for (l, &point) in self.labels.iter().enumerate() {
            by_root.entry(sets.find(point)).or_default().labels.push(l);
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if let Node::Point(p) = node {
                by_root.entry(sets.find(id)).or_default().points.push(*p);
            }
        }

        let mut components: Vec<Component> = by_root
            .into_values()
            .map(|mut c| {
                c.pins.sort_by(|a, b| pin_order(a, b));
                c.points.sort_by(|a, b| point_order(*a, *b));
                c
            })
            .collect();
        components.sort_by(|a, b| {
            let first = |c: &Component| c.points.first().copied();
            match (first(a), first(b)) {
                (Some(x), Some(y)) => point_order(x, y),
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| a.pins.first().cmp(&b.pins.first()))
        });
        components
    }
}

/// `p` lies on segment `a`-`b`, excluding its ends
pub(crate) fn on_segment(p: Point, a: Point, b: Point, tolerance: f64) -> bool {
    let d = b - a;
    let length = d.x.hypot(d.y);
    if length <= tolerance {
        return false;
    }
    let cross = (p.x - a.x) * d.y - (p.y - a.y) * d.x;
    if cross.abs() / length > tolerance {
        return false;
    }
    let t = ((p.x - a.x) * d.x + (p.y - a.y) * d.y) / (length * length);
    let margin = tolerance / length;
    t > margin && t < 1.0 - margin
}

pub(crate) fn point_order(a: Point, b: Point) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

/// Natural order on designator, then pin
pub(crate) fn pin_order(a: &(String, String), b: &(String, String)) -> Ordering {
    natord::compare(&a.0, &b.0).then_with(|| natord::compare(&a.1, &b.1))
}

fn format_coord(v: f64) -> String {
    pcb_sexpr::formatter::format_number(v)
}

/// Rebuild the nets of a parsed page.
///
/// Global labels name a net before local ones; among equals the smallest name
/// wins. Unlabeled nets are named after their first pin in natural order, or
/// their first point when they have no pins.
pub fn reconstruct_nets(page: &SchematicPage) -> Vec<Net> {
    let mut graph = ConnectivityGraph::new(SOURCE_RESOLUTION);
    for wire in &page.wires {
        graph.add_wire(wire.start, wire.end);
    }
    for junction in &page.junctions {
        graph.add_point(*junction);
    }
    for instance in &page.instances {
        for pin in &instance.pins {
            graph.add_pin(&instance.designator, &pin.number, pin.hot);
        }
    }
    for label in &page.labels {
        graph.add_label(&label.name, label.position);
    }

    let mut nets: Vec<Net> = graph
        .components()
        .into_iter()
        .filter(Component::is_net)
        .map(|component| net_from_component(page, &graph, component))
        .collect();
    nets.sort_by(|a, b| natord::compare(&a.name, &b.name));
    nets
}

fn net_from_component(page: &SchematicPage, graph: &ConnectivityGraph, c: Component) -> Net {
    let label_name = |global: bool| {
        c.labels
            .iter()
            .map(|&l| &page.labels[l])
            .filter(|l| matches!(l.kind, crate::model::LabelKind::Global { .. }) == global)
            .map(|l| l.name.as_str())
            .min()
    };
    let (name, naming) = match label_name(true).or_else(|| label_name(false)) {
        Some(name) => (name.to_string(), NetNaming::Label),
        None => {
            let name = match (c.pins.first(), c.points.first()) {
                (Some((designator, pin)), _) => format!("Net-({designator}-Pad{pin})"),
                (None, Some(p)) => format!("Net-({}_{})", format_coord(p.x), format_coord(p.y)),
                (None, None) => "Net-()".to_string(),
            };
            (name, NetNaming::Synthesized)
        }
    };

    // Wire ends that touch no pin are free endpoints.
    let pin_points: Vec<GridKey> = c
        .pins
        .iter()
        .filter_map(|(d, p)| page.instance(d).and_then(|i| i.pin(p)))
        .map(|pin| graph.key(pin.hot))
        .collect();
    let mut free: Vec<Point> = Vec::new();
    for &w in &c.wires {
        let wire = page.wires[w];
        for end in [wire.start, wire.end] {
            let key = graph.key(end);
            if !pin_points.contains(&key) && !free.iter().any(|f| graph.key(*f) == key) {
                free.push(end);
            }
        }
    }
    free.sort_by(|a, b| point_order(*a, *b));

    let endpoints = c
        .pins
        .iter()
        .map(|(designator, pin)| Endpoint::Pin {
            designator: designator.clone(),
            pin: pin.clone(),
        })
        .chain(free.into_iter().map(Endpoint::Point))
        .collect();

    Net {
        name,
        naming,
        endpoints,
        wires: c.wires,
        labels: c.labels,
        points: c.points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ComponentInstance, InstancePin, LabelKind, NetLabel, SourcePlacement, Wire,
    };

    fn part(designator: &str, pins: &[(&str, f64, f64)]) -> ComponentInstance {
        ComponentInstance {
            designator: designator.to_string(),
            part_reference: "X".to_string(),
            value: None,
            properties: Default::default(),
            placement: SourcePlacement::default(),
            pins: pins
                .iter()
                .map(|(n, x, y)| InstancePin {
                    number: n.to_string(),
                    name: n.to_string(),
                    hot: Point::new(*x, *y),
                })
                .collect(),
            element: 0,
            resolved: None,
        }
    }

    fn wire(x1: f64, y1: f64, x2: f64, y2: f64) -> Wire {
        Wire {
            start: Point::new(x1, y1),
            end: Point::new(x2, y2),
        }
    }

    fn label(name: &str, x: f64, y: f64, global: bool) -> NetLabel {
        NetLabel {
            name: name.to_string(),
            position: Point::new(x, y),
            kind: if global {
                LabelKind::Global { symbol: None }
            } else {
                LabelKind::Local
            },
        }
    }

    fn vcc_page(reverse: bool) -> SchematicPage {
        let mut instances = vec![
            part("R1", &[("1", 0.0, 0.0), ("2", 0.0, 40.0)]),
            part("C1", &[("1", 100.0, 40.0), ("2", 100.0, 0.0)]),
        ];
        if reverse {
            instances.reverse();
        }
        SchematicPage {
            name: "P1".into(),
            instances,
            wires: vec![wire(0.0, 0.0, 100.0, 0.0)],
            labels: vec![label("VCC", 50.0, 0.0, false)],
            ..Default::default()
        }
    }

    #[test]
    fn test_wire_joins_two_pins() {
        for reverse in [false, true] {
            let nets = reconstruct_nets(&vcc_page(reverse));
            assert_eq!(nets.len(), 1, "{nets:?}");
            let vcc = &nets[0];
            assert_eq!(vcc.name, "VCC");
            assert_eq!(vcc.naming, NetNaming::Label);
            let pins: Vec<_> = vcc.pins().collect();
            assert_eq!(pins, vec![("C1", "2"), ("R1", "1")]);
            assert_eq!(vcc.labels, vec![0]);
        }
    }

    #[test]
    fn test_same_name_labels_join() {
        let page = SchematicPage {
            instances: vec![
                part("U1", &[("7", 0.0, 0.0)]),
                part("U2", &[("3", 500.0, 500.0)]),
            ],
            labels: vec![
                label("CLK", 0.0, 0.0, false),
                label("CLK", 500.0, 500.0, false),
            ],
            ..Default::default()
        };
        let nets = reconstruct_nets(&page);
        assert_eq!(nets.len(), 1);
        assert!(nets[0].has_pin("U1", "7") && nets[0].has_pin("U2", "3"));
    }

    #[test]
    fn test_global_label_wins() {
        let page = SchematicPage {
            wires: vec![wire(0.0, 0.0, 10.0, 0.0)],
            labels: vec![label("A_LOCAL", 0.0, 0.0, false), label("VCC", 10.0, 0.0, true)],
            ..Default::default()
        };
        assert_eq!(reconstruct_nets(&page)[0].name, "VCC");
    }

    #[test]
    fn test_synthesized_names_use_natural_order() {
        let page = SchematicPage {
            instances: vec![
                part("R10", &[("1", 0.0, 0.0)]),
                part("R9", &[("2", 10.0, 0.0)]),
            ],
            wires: vec![wire(0.0, 0.0, 10.0, 0.0), wire(300.0, 0.0, 300.0, 20.5)],
            ..Default::default()
        };
        let nets = reconstruct_nets(&page);
        let names: Vec<&str> = nets.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Net-(300_0)", "Net-(R9-Pad2)"]);
        assert_eq!(nets[1].naming, NetNaming::Synthesized);
        assert_eq!(
            nets[0].endpoints,
            vec![
                Endpoint::Point(Point::new(300.0, 0.0)),
                Endpoint::Point(Point::new(300.0, 20.5))
            ]
        );
    }

    #[test]
    fn test_tee_joins_but_crossing_does_not() {
        let page = SchematicPage {
            wires: vec![
                wire(0.0, 0.0, 100.0, 0.0),
                // Tee: ends on the first wire
                wire(50.0, 0.0, 50.0, 50.0),
                // Crosses the first wire without a junction
                wire(80.0, -20.0, 80.0, 20.0),
            ],
            ..Default::default()
        };
        let nets = reconstruct_nets(&page);
        assert_eq!(nets.len(), 2);
        let mut sizes: Vec<usize> = nets.iter().map(|n| n.wires.len()).collect();
        sizes.sort();
        assert_eq!(sizes, vec![1, 2]);

        let mut joined = page.clone();
        joined.junctions.push(Point::new(80.0, 0.0));
        assert_eq!(reconstruct_nets(&joined).len(), 1);
    }

    #[test]
    fn test_lone_pin_is_not_a_net() {
        let page = SchematicPage {
            instances: vec![part("TP1", &[("1", 0.0, 0.0)])],
            ..Default::default()
        };
        assert!(reconstruct_nets(&page).is_empty());
    }

    #[test]
    fn test_on_segment() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert!(on_segment(Point::new(5.0, 0.0), a, b, 1e-3));
        assert!(!on_segment(a, a, b, 1e-3));
        assert!(!on_segment(Point::new(5.0, 0.1), a, b, 1e-3));
        assert!(!on_segment(Point::new(11.0, 0.0), a, b, 1e-3));
    }
}
