//! Flattening of a legacy module tree into the layer graph.

use crate::error::NetError;
use crate::layer::LayerParams;
use crate::net::Net;
use crate::torch::module::Module;

/// Flatten `root` into `net`.
///
/// The tree is walked depth-first; leaves become layers of their API type
/// and containers are lowered into explicit split/merge wiring. Table
/// containers (`JoinTable`, `CAddTable`) collect whatever outputs are still
/// unconsumed when they are reached, so the siblings that produce those
/// outputs (a preceding `ConcatTable`) must come earlier in the tree.
pub fn populate_net(net: &mut Net, root: &Module) -> Result<(), NetError> {
    let mut importer = Importer { net, counter: 0 };
    let mut added = Vec::new();
    importer.fill(root, &mut added, 0, 0)?;
    Ok(())
}

struct Importer<'n> {
    net: &'n mut Net,
    counter: usize,
}

impl<'n> Importer<'n> {
    fn layer_name(&mut self, label: &str) -> String {
        self.counter += 1;
        format!("l{}_{}", self.counter, label)
    }

    /// Emit the graph nodes for `module`, whose input is output `prev_out`
    /// of layer `prev_id`. Returns the id of the layer carrying the
    /// module's result.
    ///
    /// `added` records every emitted layer together with its source module
    /// so that later siblings can locate earlier emitters (the pooling /
    /// unpooling pairing).
    fn fill<'m>(
        &mut self,
        module: &'m Module,
        added: &mut Vec<(usize, &'m Module)>,
        prev_id: usize,
        prev_out: usize,
    ) -> Result<usize, NetError> {
        if let Some(api_type) = &module.api_type {
            let name = self.layer_name(api_type);
            let id = self.net.add_layer(&name, api_type, module.params.clone())?;
            self.net.connect(prev_id, prev_out, id, 0)?;
            added.push((id, module));
            return Ok(id);
        }

        match module.th_name.as_str() {
            "Sequential" => {
                let mut prev = (prev_id, prev_out);
                for child in &module.children {
                    prev = (self.fill(child, added, prev.0, prev.1)?, 0);
                }
                Ok(prev.0)
            }

            "Concat" => {
                let mut merge_params = LayerParams::new();
                merge_params.set_i64("axis", module.params.get_i64("dimension")? - 1);

                let split_name = self.layer_name("torchSplit");
                let merge_name = self.layer_name("torchMerge");
                let split_id = self.net.add_layer(&split_name, "Split", LayerParams::new())?;
                let merge_id = self.net.add_layer(&merge_name, "Concat", merge_params)?;
                self.net.connect(prev_id, prev_out, split_id, 0)?;

                for (i, child) in module.children.iter().enumerate() {
                    let child_id = self.fill(child, added, split_id, i)?;
                    self.net.connect(child_id, 0, merge_id, i)?;
                }
                added.push((merge_id, module));
                Ok(merge_id)
            }

            "Parallel" => {
                let in_axis = module.params.get_i64("inputDimension")? - 1;
                let out_axis = module.params.get_i64("outputDimension")? - 1;

                let mut split_params = LayerParams::new();
                split_params.set_i64("axis", in_axis);
                // Each slice keeps a size-1 axis that the original modules
                // never saw; squeeze it out before the children run.
                let mut reshape_params = LayerParams::new();
                reshape_params.set_i64("axis", in_axis);
                reshape_params.set_i64("num_axes", 1);
                let mut merge_params = LayerParams::new();
                merge_params.set_i64("axis", out_axis);

                let split_name = self.layer_name("torchSplit");
                let merge_name = self.layer_name("torchMerge");
                let reshape_name = self.layer_name("torchReshape");
                let split_id = self.net.add_layer(&split_name, "Slice", split_params)?;
                let merge_id = self.net.add_layer(&merge_name, "Concat", merge_params)?;
                let reshape_id = self.net.add_layer(&reshape_name, "Reshape", reshape_params)?;
                self.net.connect(prev_id, prev_out, split_id, 0)?;

                for (i, child) in module.children.iter().enumerate() {
                    self.net.connect(split_id, i, reshape_id, i)?;
                    let child_id = self.fill(child, added, reshape_id, i)?;
                    self.net.connect(child_id, 0, merge_id, i)?;
                }
                added.push((merge_id, module));
                Ok(merge_id)
            }

            "ConcatTable" => {
                let split_name = self.layer_name("torchSplit");
                let split_id = self.net.add_layer(&split_name, "Split", LayerParams::new())?;
                self.net.connect(prev_id, prev_out, split_id, 0)?;
                added.push((split_id, module));

                // No merge node: a later JoinTable or CAddTable sibling
                // collects the children as unconnected outputs.
                let mut last_id = split_id;
                for (i, child) in module.children.iter().enumerate() {
                    last_id = self.fill(child, added, split_id, i)?;
                }
                Ok(last_id)
            }

            "JoinTable" => {
                let ids = self.net.unconnected_out_layers();

                let mut merge_params = LayerParams::new();
                merge_params.set_i64("axis", module.params.get_i64("dimension")? - 1);
                let merge_name = self.layer_name("torchMerge");
                let merge_id = self.net.add_layer(&merge_name, "Concat", merge_params)?;

                for (i, &id) in ids.iter().enumerate() {
                    self.net.connect(id, 0, merge_id, i)?;
                }
                added.push((merge_id, module));
                Ok(merge_id)
            }

            "CAddTable" => {
                let ids = self.net.unconnected_out_layers();

                let mut params = LayerParams::new();
                params.set_str("operation", "sum");
                let name = self.layer_name("torchCAddTable");
                let sum_id = self.net.add_layer(&name, "Eltwise", params)?;

                for (i, &id) in ids.iter().enumerate() {
                    self.net.connect(id, 0, sum_id, i)?;
                }
                added.push((sum_id, module));
                Ok(sum_id)
            }

            "SpatialMaxUnpooling" => {
                let indices_blob_id = module.params.get_i64("indices_blob_id")?;
                let partner = added.iter().find(|(_, m)| {
                    m.api_type.as_deref() == Some("Pooling")
                        && m.params
                            .get("indices_blob_id")
                            .and_then(|v| v.as_i64())
                            == Some(indices_blob_id)
                });
                let Some(&(pool_id, pool_module)) = partner else {
                    return Err(NetError::Import(format!(
                        "no pooling layer with indices blob {indices_blob_id} precedes the unpooling"
                    )));
                };

                let mut params = module.params.clone();
                for (dst, src) in [
                    ("pool_k_h", "kernel_h"),
                    ("pool_k_w", "kernel_w"),
                    ("pool_stride_h", "stride_h"),
                    ("pool_stride_w", "stride_w"),
                    ("pool_pad_h", "pad_h"),
                    ("pool_pad_w", "pad_w"),
                ] {
                    params.set_i64(dst, pool_module.params.get_i64(src)?);
                }

                let name = self.layer_name("torchMaxUnpooling");
                let id = self.net.add_layer(&name, "MaxUnpool", params)?;
                self.net.connect(prev_id, prev_out, id, 0)?;
                // The pooling layer's second output carries the indices.
                self.net.connect(pool_id, 1, id, 1)?;
                added.push((id, module));
                Ok(id)
            }

            other => Err(NetError::NotImplemented(format!(
                "legacy container \"{other}\""
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::populate_net;
    use crate::error::NetError;
    use crate::net::{LayerPin, Net};
    use crate::tensor::Tensor;
    use crate::torch::module::Module;

    fn layer_id_of_type(net: &Net, layer_type: &str) -> usize {
        ids_of_type(net, layer_type)[0]
    }

    fn ids_of_type(net: &Net, layer_type: &str) -> Vec<usize> {
        net.layer_ids()
            .into_iter()
            .filter(|&id| net.layer(id).unwrap().layer_type() == layer_type)
            .collect()
    }

    #[test]
    fn test_sequential_of_leaves() {
        let mut root = Module::new("Sequential");
        root.add_child(Module::with_api_type("SpatialConvolution", "Convolution"));
        root.add_child(Module::with_api_type("ReLU", "ReLU"));

        let mut net = Net::new();
        populate_net(&mut net, &root).unwrap();

        let conv = layer_id_of_type(&net, "Convolution");
        let relu = layer_id_of_type(&net, "ReLU");
        assert_eq!(
            net.layer(conv).unwrap().input_pins(),
            [Some(LayerPin { lid: 0, oid: 0 })]
        );
        assert_eq!(
            net.layer(relu).unwrap().input_pins(),
            [Some(LayerPin { lid: conv, oid: 0 })]
        );
        assert_eq!(net.unconnected_out_layers(), [relu]);
    }

    #[test]
    fn test_concat_container_lowering() {
        // Sequential [ Conv, ReLU, Sequential [ Concat(dim=2) [ Identity,
        // Sequential [ Linear ] ] ] ] flattens to conv -> relu -> split
        // feeding both branches, collected by a concat on axis 1.
        let mut branch = Module::new("Concat");
        branch.params.set_i64("dimension", 2);
        branch.add_child(Module::with_api_type("Identity", "Identity"));
        let mut inner_seq = Module::new("Sequential");
        inner_seq.add_child(Module::with_api_type("Linear", "InnerProduct"));
        branch.add_child(inner_seq);

        let mut outer_seq = Module::new("Sequential");
        outer_seq.add_child(branch);

        let mut root = Module::new("Sequential");
        root.add_child(Module::with_api_type("SpatialConvolution", "Convolution"));
        root.add_child(Module::with_api_type("ReLU", "ReLU"));
        root.add_child(outer_seq);

        let mut net = Net::new();
        populate_net(&mut net, &root).unwrap();

        let mut types: Vec<&str> = net
            .layer_ids()
            .into_iter()
            .skip(1)
            .map(|id| net.layer(id).unwrap().layer_type())
            .collect();
        types.sort_unstable();
        assert_eq!(
            types,
            ["Concat", "Convolution", "Identity", "InnerProduct", "ReLU", "Split"]
        );

        let relu = layer_id_of_type(&net, "ReLU");
        let split = layer_id_of_type(&net, "Split");
        let identity = layer_id_of_type(&net, "Identity");
        let linear = layer_id_of_type(&net, "InnerProduct");
        let merge = layer_id_of_type(&net, "Concat");

        // The split follows the relu and feeds both branches.
        assert_eq!(
            net.layer(split).unwrap().input_pins(),
            [Some(LayerPin { lid: relu, oid: 0 })]
        );
        assert_eq!(
            net.layer(identity).unwrap().input_pins(),
            [Some(LayerPin { lid: split, oid: 0 })]
        );
        assert_eq!(
            net.layer(linear).unwrap().input_pins(),
            [Some(LayerPin { lid: split, oid: 1 })]
        );

        // The merge collects the branch outputs in order, on axis 1.
        assert_eq!(
            net.layer(merge).unwrap().input_pins(),
            [
                Some(LayerPin { lid: identity, oid: 0 }),
                Some(LayerPin { lid: linear, oid: 0 })
            ]
        );
        assert_eq!(net.layer(merge).unwrap().params().get_i64("axis").unwrap(), 1);
        assert_eq!(net.unconnected_out_layers(), [merge]);
    }

    #[test]
    fn test_concat_with_single_child_preserves_values() {
        // A split plus single-input concat must not change values.
        let mut branch = Module::new("Concat");
        branch.params.set_i64("dimension", 2);
        branch.add_child(Module::with_api_type("Identity", "Identity"));
        let mut root = Module::new("Sequential");
        root.add_child(branch);

        let mut net = Net::new();
        populate_net(&mut net, &root).unwrap();

        net.set_blob("", Tensor::from_data(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]))
            .unwrap();
        net.forward_all().unwrap();

        let merge = layer_id_of_type(&net, "Concat");
        let out = net.layer(merge).unwrap().outputs()[0].clone();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(&*out.as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_parallel_container_lowering() {
        let mut parallel = Module::new("Parallel");
        parallel.params.set_i64("inputDimension", 2);
        parallel.params.set_i64("outputDimension", 2);
        parallel.add_child(Module::with_api_type("Identity", "Identity"));
        parallel.add_child(Module::with_api_type("Identity", "Identity"));

        let mut root = Module::new("Sequential");
        root.add_child(parallel);

        let mut net = Net::new();
        populate_net(&mut net, &root).unwrap();

        let slice = layer_id_of_type(&net, "Slice");
        let reshape = layer_id_of_type(&net, "Reshape");
        let merge = layer_id_of_type(&net, "Concat");
        let identities = ids_of_type(&net, "Identity");

        assert_eq!(net.layer(slice).unwrap().params().get_i64("axis").unwrap(), 1);
        assert_eq!(
            net.layer(reshape).unwrap().params().get_i64("num_axes").unwrap(),
            1
        );
        assert_eq!(
            net.layer(reshape).unwrap().input_pins(),
            [
                Some(LayerPin { lid: slice, oid: 0 }),
                Some(LayerPin { lid: slice, oid: 1 })
            ]
        );
        assert_eq!(
            net.layer(merge).unwrap().input_pins(),
            [
                Some(LayerPin { lid: identities[0], oid: 0 }),
                Some(LayerPin { lid: identities[1], oid: 0 })
            ]
        );

        // End to end: two [2, 1, 3] slices squeeze to [2, 3] and
        // concatenate along axis 1 into [2, 6], which for identity branches
        // preserves the flat element order.
        net.set_blob(
            "",
            Tensor::from_data(&[2, 2, 3], (0..12).map(|v| v as f32).collect()),
        )
        .unwrap();
        net.forward_all().unwrap();
        let out = net.layer(merge).unwrap().outputs()[0].clone();
        assert_eq!(out.shape(), &[2, 6]);
        assert_eq!(
            &*out.as_f32().unwrap(),
            &[0., 1., 2., 3., 4., 5., 6., 7., 8., 9., 10., 11.]
        );
    }

    #[test]
    fn test_concat_table_with_c_add_table() {
        // Sequential [ ConcatTable [ A, B ], CAddTable ]: the element-wise
        // sum has exactly two inputs, sourced from A and B.
        let mut table = Module::new("ConcatTable");
        table.add_child(Module::with_api_type("Identity", "Identity"));
        table.add_child(Module::with_api_type("Identity", "Identity"));

        let mut root = Module::new("Sequential");
        root.add_child(table);
        root.add_child(Module::new("CAddTable"));

        let mut net = Net::new();
        populate_net(&mut net, &root).unwrap();

        let split = layer_id_of_type(&net, "Split");
        let branches = ids_of_type(&net, "Identity");
        let sum = layer_id_of_type(&net, "Eltwise");

        assert_eq!(
            net.layer(branches[0]).unwrap().input_pins(),
            [Some(LayerPin { lid: split, oid: 0 })]
        );
        assert_eq!(
            net.layer(branches[1]).unwrap().input_pins(),
            [Some(LayerPin { lid: split, oid: 1 })]
        );
        assert_eq!(
            net.layer(sum).unwrap().input_pins(),
            [
                Some(LayerPin { lid: branches[0], oid: 0 }),
                Some(LayerPin { lid: branches[1], oid: 0 })
            ]
        );

        // x + x doubles the input.
        net.set_blob("", Tensor::from_data(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]))
            .unwrap();
        net.forward_all().unwrap();
        let out = net.layer(sum).unwrap().outputs()[0].clone();
        assert_eq!(&*out.as_f32().unwrap(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_join_table_concatenates_branches() {
        let mut table = Module::new("ConcatTable");
        table.add_child(Module::with_api_type("Identity", "Identity"));
        table.add_child(Module::with_api_type("Identity", "Identity"));

        let mut join = Module::new("JoinTable");
        join.params.set_i64("dimension", 1);

        let mut root = Module::new("Sequential");
        root.add_child(table);
        root.add_child(join);

        let mut net = Net::new();
        populate_net(&mut net, &root).unwrap();

        net.set_blob("", Tensor::from_data(&[1, 2], vec![5.0f32, 6.0]))
            .unwrap();
        net.forward_all().unwrap();

        let merge = layer_id_of_type(&net, "Concat");
        assert_eq!(net.layer(merge).unwrap().params().get_i64("axis").unwrap(), 0);
        let out = net.layer(merge).unwrap().outputs()[0].clone();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(&*out.as_f32().unwrap(), &[5.0, 6.0, 5.0, 6.0]);
    }

    #[test]
    fn test_unpooling_finds_partner_pooling() {
        let mut pool = Module::with_api_type("SpatialMaxPooling", "Pooling");
        pool.params.set_str("pool", "MAX");
        pool.params.set_i64("indices_blob_id", 7);
        for (name, value) in [
            ("kernel_h", 2),
            ("kernel_w", 2),
            ("stride_h", 2),
            ("stride_w", 2),
            ("pad_h", 0),
            ("pad_w", 0),
        ] {
            pool.params.set_i64(name, value);
        }

        let mut unpool = Module::new("SpatialMaxUnpooling");
        unpool.params.set_i64("indices_blob_id", 7);

        let mut root = Module::new("Sequential");
        root.add_child(pool);
        root.add_child(Module::with_api_type("ReLU", "ReLU"));
        root.add_child(unpool);

        let mut net = Net::new();
        populate_net(&mut net, &root).unwrap();

        let pool_id = layer_id_of_type(&net, "Pooling");
        let relu_id = layer_id_of_type(&net, "ReLU");
        let unpool_id = layer_id_of_type(&net, "MaxUnpool");

        // Data flows through the relu; the indices come from the pooling
        // layer's second output.
        assert_eq!(
            net.layer(unpool_id).unwrap().input_pins(),
            [
                Some(LayerPin { lid: relu_id, oid: 0 }),
                Some(LayerPin { lid: pool_id, oid: 1 })
            ]
        );
        assert!(net.layer(pool_id).unwrap().required_outputs().contains(&1));

        let unpool_params = net.layer(unpool_id).unwrap().params();
        assert_eq!(unpool_params.get_i64("pool_k_h").unwrap(), 2);
        assert_eq!(unpool_params.get_i64("pool_stride_w").unwrap(), 2);
    }

    #[test]
    fn test_unpooling_without_partner_fails() {
        let mut unpool = Module::new("SpatialMaxUnpooling");
        unpool.params.set_i64("indices_blob_id", 3);
        let mut root = Module::new("Sequential");
        root.add_child(unpool);

        let mut net = Net::new();
        let err = populate_net(&mut net, &root).err().unwrap();
        assert!(matches!(err, NetError::Import(_)));
    }

    #[test]
    fn test_unknown_container_fails() {
        let mut root = Module::new("Sequential");
        root.add_child(Module::new("MysteryTable"));

        let mut net = Net::new();
        let err = populate_net(&mut net, &root).err().unwrap();
        assert!(matches!(err, NetError::NotImplemented(_)));
    }
}
